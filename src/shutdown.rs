//! Graceful shutdown handling.
//!
//! A signal (Ctrl+C, SIGTERM, SIGHUP) or the end of the transport triggers the
//! controller; [`ShutdownController::graceful_shutdown`] then releases the
//! database connection through [`DatabaseService::shutdown`], bounded by a timeout.

use crate::constants::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::service::DatabaseService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    shutting_down: AtomicBool,
    /// Upper bound on closing the connection.
    close_timeout: Duration,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(close_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            close_timeout,
        }
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Initiate shutdown. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown...");
            let _ = self.sender.send(true);
        }
    }

    /// Signal shutdown and release the database connection.
    pub async fn graceful_shutdown(&self, service: &DatabaseService) {
        self.shutdown();

        info!("Closing database connection...");
        if tokio::time::timeout(self.close_timeout, service.shutdown())
            .await
            .is_err()
        {
            warn!(
                "Closing the database connection exceeded {:?}; abandoning it",
                self.close_timeout
            );
        }

        info!("Graceful shutdown complete");
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

pub fn new_shutdown_controller() -> SharedShutdownController {
    Arc::new(ShutdownController::new())
}

/// Install signal handlers that trigger `controller`.
///
/// Ctrl+C everywhere; SIGTERM and SIGHUP on unix.
pub async fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", name);
                        controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    drop(controller);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::testing::ScriptedConnector;
    use std::path::PathBuf;

    fn service(connector: &ScriptedConnector) -> DatabaseService {
        let config = Config::from_vars(PathBuf::from("/work"), |_| None).unwrap();
        DatabaseService::new(config, Arc::new(connector.clone()))
    }

    async fn fired(signal: &mut ShutdownSignal) -> bool {
        tokio::time::timeout(Duration::from_millis(100), signal.recv())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();
        assert!(!fired(&mut signal).await);

        controller.shutdown();
        assert!(fired(&mut signal).await);

        // second call is a no-op
        controller.shutdown();
        assert!(fired(&mut controller.signal()).await);
    }

    #[tokio::test]
    async fn test_signal_recv_wakes() {
        let controller = new_shutdown_controller();
        let mut signal = controller.signal();

        let trigger = controller.clone();
        tokio::spawn(async move { trigger.shutdown() });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_connection() {
        let connector = ScriptedConnector::empty();
        let service = service(&connector);
        service.connect("db1", "Sales", None, None).await.unwrap();

        let controller = ShutdownController::new();
        let mut signal = controller.signal();

        controller.graceful_shutdown(&service).await;

        assert!(fired(&mut signal).await);
        assert_eq!(connector.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_without_connection() {
        let connector = ScriptedConnector::empty();
        let service = service(&connector);

        let controller = ShutdownController::with_timeout(Duration::from_secs(1));
        controller.graceful_shutdown(&service).await;
        controller.graceful_shutdown(&service).await;
        assert!(fired(&mut controller.signal()).await);
    }
}
