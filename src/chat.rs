//! LLM tool-calling loop.
//!
//! A [`ChatSession`] sends the user's question together with the tool table to
//! an OpenAI-compatible chat-completions endpoint, runs whatever tool calls the
//! model asks for through the same [`ToolDispatcher`](crate::tools::ToolDispatcher)
//! the MCP server uses, and asks the model once more to phrase the answer.

pub mod client;
pub mod session;
pub mod types;

pub use client::{ChatModel, OpenAiClient};
pub use session::{system_prompt, ChatSession, ChatTurn, ConversationHistory};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionCall, Role, ToolCall,
    ToolDefinition,
};
