use crate::error::{RetrievalError, Result};
use crate::retrieval::{Chunk, Retriever};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    chunks: Vec<Chunk>,
}

/// 通过 HTTP 调用外部检索服务
///
/// 请求：`POST {endpoint}`，body 为 `{"query", "limit", "scope_id"}`；
/// 响应：`{"chunks": [{"text", "page", "chunk_index", "scope_id"}]}`。
pub struct HttpRetriever {
    client: Arc<Client>,
    endpoint: String,
}

impl HttpRetriever {
    pub fn new(client: Arc<Client>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str, limit: usize, scope_id: Option<&str>) -> Result<Vec<Chunk>> {
        let body = SearchRequest {
            query,
            limit,
            scope_id,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RetrievalError::Backend { status, message }.into());
        }

        let parsed = response
            .json::<SearchResponse>()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
        debug!(hits = parsed.chunks.len(), scope_id = ?scope_id, "🔎 检索完成");
        Ok(parsed.chunks)
    }
}
