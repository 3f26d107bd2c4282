pub mod compression;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod retrieval;
pub mod service;
pub mod state;
pub mod testing;
pub mod tools;

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::{QaError, Result};
    pub use crate::llm::{HttpLlmClient, LlmClient, ReasoningOutput};
    pub use crate::memory::{Checkpointer, InMemoryCheckpointer, SqliteCheckpointer};
    pub use crate::pipeline::{PipelineConfig, QaPipeline, StageName};
    pub use crate::retrieval::{Chunk, HttpRetriever, Retriever};
    pub use crate::service::{AskResponse, ConversationService, InMemoryThreadRegistry};
    pub use crate::state::ConversationState;
    pub use crate::tools::{Tool, ToolParameters, ToolResult};
}
