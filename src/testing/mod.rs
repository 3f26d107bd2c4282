//! 测试基础设施
//!
//! 提供在不依赖真实 LLM / 检索服务 / 数据库的情况下测试各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockLlmClient`] | 替代真实 LLM：预设文本、工具调用或错误响应，并记录每次调用 |
//! | [`MockRetriever`] | 替代检索服务：预设检索结果或故障，并记录查询参数 |
//!
//! Checkpoint 存储的测试直接使用 [`InMemoryCheckpointer`](crate::memory::InMemoryCheckpointer)
//! 或临时目录中的 [`SqliteCheckpointer`](crate::memory::SqliteCheckpointer)。
//!
//! # 使用示例
//!
//! ```rust
//! use docqa_agent::testing::{MockLlmClient, MockRetriever};
//! use docqa_agent::pipeline::{PipelineConfig, QaPipeline};
//! use docqa_agent::retrieval::Chunk;
//! use docqa_agent::state::ConversationState;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let llm = Arc::new(
//!     MockLlmClient::new()
//!         .with_tool_call("search_documents", serde_json::json!({"query": "IVF"}))
//!         .with_response("context gathered")
//!         .with_response("draft")
//!         .with_response("IVF partitions vectors into clusters."),
//! );
//! let retriever = Arc::new(MockRetriever::new().with_chunks(vec![Chunk::new("IVF ...", 1, 0)]));
//! let pipeline = QaPipeline::new(llm, retriever, PipelineConfig::default());
//!
//! let state = pipeline.run(ConversationState::new("What is IVF?"), "t-1").await.unwrap();
//! assert_eq!(state.answer.as_deref(), Some("IVF partitions vectors into clusters."));
//! # }
//! ```

mod mock_llm;
mod mock_retriever;

pub use mock_llm::{MockCall, MockLlmClient};
pub use mock_retriever::{MockRetriever, SearchCall};
