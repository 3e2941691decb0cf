//! Language model backends.

pub mod mock;
pub mod openai;

pub use mock::{MockReply, ScriptedLlmClient};
pub use openai::{LlmApiError, OpenAiClient};
