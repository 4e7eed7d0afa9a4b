//! One conversation with the model over the database tools.

use super::client::ChatModel;
use super::types::{ChatCompletionRequest, ChatMessage, Role, ToolCall};
use crate::config::Config;
use crate::constants::{HISTORY_MAX_ENTRIES, HISTORY_RETAINED_ENTRIES};
use crate::error::ServerError;
use crate::tools::{ToolDispatcher, ToolOutput};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Messages carried between turns.
///
/// Whenever the length exceeds [`HISTORY_MAX_ENTRIES`] only the most recent
/// [`HISTORY_RETAINED_ENTRIES`] are kept.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
        self.truncate();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.entries.extend(messages);
        self.truncate();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// History as sent to the model.
    ///
    /// Truncation can cut between an assistant tool-call message and its
    /// outputs; tool messages left without their call at the front are dropped.
    pub fn replay(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().skip_while(|m| m.role == Role::Tool)
    }

    fn truncate(&mut self) {
        if self.entries.len() > HISTORY_MAX_ENTRIES {
            let excess = self.entries.len() - HISTORY_RETAINED_ENTRIES;
            self.entries.drain(..excess);
            debug!("Conversation history truncated to {} entries", self.entries.len());
        }
    }
}

/// Outcome of one user turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// Final answer text
    pub answer: String,
    /// Model that served the turn
    pub model: String,
    /// Names of the tools run, in order
    pub tools_called: Vec<String>,
}

/// Drives the model over the tool table for a sequence of user turns.
pub struct ChatSession {
    model: Arc<dyn ChatModel>,
    dispatcher: Arc<ToolDispatcher>,
    models: Vec<String>,
    system_prompt: String,
    history: ConversationHistory,
}

impl ChatSession {
    /// Create a session; the fallback order comes from the service configuration.
    pub fn new(model: Arc<dyn ChatModel>, dispatcher: Arc<ToolDispatcher>) -> Self {
        let config = dispatcher.service().config();
        let models = config.model.models.clone();
        let system_prompt = system_prompt(config);
        Self {
            model,
            dispatcher,
            models,
            system_prompt,
            history: ConversationHistory::new(),
        }
    }

    /// Replace the model fallback order.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Answer one user message.
    ///
    /// The first completion walks the fallback list and pins the first model
    /// that answers. Requested tool calls run in order, then one follow-up
    /// completion on the pinned model, without tools, produces the answer.
    pub async fn send(&mut self, user_message: &str) -> Result<ChatTurn, ServerError> {
        let user = ChatMessage::user(user_message);

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.replay().cloned());
        messages.push(user.clone());

        let (pinned, reply) = self.complete_with_fallback(&messages).await?;
        let calls: Vec<ToolCall> = reply.tool_calls().to_vec();

        if calls.is_empty() {
            let answer = reply.content_text().to_string();
            self.history
                .extend([user, ChatMessage::assistant(answer.clone())]);
            return Ok(ChatTurn {
                answer,
                model: pinned,
                tools_called: Vec::new(),
            });
        }

        let mut turn = vec![user, reply.clone()];
        messages.push(reply);

        let mut tools_called = Vec::with_capacity(calls.len());
        for call in &calls {
            info!("Model requested tool {}", call.function.name);
            let output = self.run_tool(call).await;
            let message = ChatMessage::tool(call.id.clone(), output);
            messages.push(message.clone());
            turn.push(message);
            tools_called.push(call.function.name.clone());
        }

        let request = ChatCompletionRequest::follow_up(pinned.clone(), messages);
        let answer = match self.model.complete(&request).await {
            Ok(message) => message.content_text().to_string(),
            Err(e) => {
                warn!("Follow-up completion failed: {}", e);
                format!("Tool executed successfully, but final response failed: {}", e)
            }
        };

        turn.push(ChatMessage::assistant(answer.clone()));
        self.history.extend(turn);

        Ok(ChatTurn {
            answer,
            model: pinned,
            tools_called,
        })
    }

    async fn complete_with_fallback(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, ChatMessage), ServerError> {
        let mut failures = Vec::new();

        for model in &self.models {
            let request = ChatCompletionRequest::with_tools(model.clone(), messages.to_vec());
            match self.model.complete(&request).await {
                Ok(message) => {
                    info!("Using model {}", model);
                    return Ok((model.clone(), message));
                }
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    failures.push(format!("{}: {}", model, e));
                }
            }
        }

        Err(ServerError::ModelsExhausted { failures })
    }

    async fn run_tool(&self, call: &ToolCall) -> String {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Ok(Value::Object(Map::new()))
        } else {
            serde_json::from_str::<Value>(raw)
        };

        match arguments {
            Ok(arguments) => {
                self.dispatcher
                    .dispatch(&call.function.name, arguments)
                    .await
                    .text
            }
            Err(e) => {
                ToolOutput::error(format!(
                    "Invalid arguments for {}: {}",
                    call.function.name, e
                ))
                .text
            }
        }
    }
}

/// System message describing the assistant's role and the tool conventions.
pub fn system_prompt(config: &Config) -> String {
    let mut prompt = String::from("You are a knowledgeable and efficient SQL Server assistant");

    match (&config.database.database, &config.database.server) {
        (Some(database), Some(server)) => prompt.push_str(&format!(
            " connected to the database '{}' hosted on server '{}'.\n\n",
            database, server
        )),
        _ => prompt.push_str(".\n\n"),
    }

    prompt.push_str(
        "Your capabilities:\n\
         - Connect to the database\n\
         - Execute SQL queries and stored procedures\n\
         - Retrieve and describe table schemas\n\
         - Explore table relationships and foreign key connections\n\
         - List, search and explain stored procedures and their parameters\n\
         - Generate queries from SQL file templates\n\
         - Analyze and summarize data returned by queries\n\n\
         Guidelines:\n\
         - Connect to the database before any other operation if no connection is open\n\
         - Use get_related_tables for questions about relationships, foreign keys or connections between tables\n\
         - Use generate_query_from_template when asked to reuse an existing SQL file; refer to templates by file name only (e.g. \"query.sql\")\n",
    );
    prompt.push_str(&format!(
        "- Schema defaults to '{}' when not specified\n",
        config.database.default_schema
    ));
    prompt.push_str("- Tool results starting with \"Error:\" describe a failure; explain it to the user\n");
    prompt
}
