//! Mock 检索服务
//!
//! 按顺序返回预设的检索结果，队列耗尽后返回默认结果（初始为空）。

use crate::error::{RetrievalError, Result};
use crate::retrieval::{Chunk, Retriever};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

enum MockSearch {
    Chunks(Vec<Chunk>),
    Fail(String),
}

/// 一次 `search` 调用的参数记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
    pub query: String,
    pub limit: usize,
    pub scope_id: Option<String>,
}

#[derive(Default)]
pub struct MockRetriever {
    queue: Mutex<VecDeque<MockSearch>>,
    default_chunks: Vec<Chunk>,
    calls: Mutex<Vec<SearchCall>>,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一次检索结果
    pub fn with_chunks(self, chunks: Vec<Chunk>) -> Self {
        self.queue.lock().unwrap().push_back(MockSearch::Chunks(chunks));
        self
    }

    /// 追加一次检索失败
    pub fn with_failure(self, msg: impl Into<String>) -> Self {
        self.queue.lock().unwrap().push_back(MockSearch::Fail(msg.into()));
        self
    }

    /// 队列耗尽后返回的结果
    pub fn with_default_chunks(mut self, chunks: Vec<Chunk>) -> Self {
        self.default_chunks = chunks;
        self
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(&self, query: &str, limit: usize, scope_id: Option<&str>) -> Result<Vec<Chunk>> {
        self.calls.lock().unwrap().push(SearchCall {
            query: query.to_string(),
            limit,
            scope_id: scope_id.map(String::from),
        });

        let next = self.queue.lock().unwrap().pop_front();
        let chunks = match next {
            Some(MockSearch::Chunks(chunks)) => chunks,
            Some(MockSearch::Fail(msg)) => return Err(RetrievalError::Unreachable(msg).into()),
            None => self.default_chunks.clone(),
        };

        // 模拟后端的作用域过滤与数量上限
        Ok(chunks
            .into_iter()
            .filter(|c| match (scope_id, c.scope_id.as_deref()) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            })
            .take(limit)
            .collect())
    }
}
