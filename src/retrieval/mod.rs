//! 检索能力（Retrieval Capability）
//!
//! 向量检索本身在外部服务中完成，这里只定义窄接口 [`Retriever`] 和结果的文本序列化。

mod http;

pub use http::HttpRetriever;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 检索返回的单个文档片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    /// 片段所属的文档 / 语料标识
    #[serde(default)]
    pub scope_id: Option<String>,
}

impl Chunk {
    pub fn new(text: impl Into<String>, page: u32, chunk_index: u32) -> Self {
        Self {
            text: text.into(),
            page: Some(page),
            chunk_index: Some(chunk_index),
            scope_id: None,
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }
}

/// 检索接口：按相关度降序返回至多 `limit` 个片段
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, limit: usize, scope_id: Option<&str>) -> Result<Vec<Chunk>>;
}

pub const NO_CHUNKS_FOUND: &str = "No relevant document chunks found.";

/// 把检索结果格式化为上下文文本：
///
/// ```text
/// Chunk 1 (page=3): ...
///
/// Chunk 2 (page=7): ...
/// ```
pub fn serialize_chunks(chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return NO_CHUNKS_FOUND.to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let page = chunk
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!("Chunk {} (page={}): {}", i + 1, page, chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
