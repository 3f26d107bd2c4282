//! 会话状态快照（Checkpointer）
//!
//! 每个 `thread_id` 只保留最新一份 [`ConversationState`] 快照。
//! 快照仅在流水线完整执行后整体写入，写入要么完全生效、要么不生效，
//! 因此读取方永远看不到半截状态。
//!
//! ## 内置实现
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`InMemoryCheckpointer`] | 进程内存，重启即清空，适合测试 |
//! | [`SqliteCheckpointer`](super::SqliteCheckpointer) | SQLite 持久化，经连接池访问 |

use crate::error::Result;
use crate::state::ConversationState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::debug;

// ── Checkpoint ────────────────────────────────────────────────────────────────

/// 单个会话线程的状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// 快照唯一 ID（UUID v4），每次保存都会更换
    pub checkpoint_id: String,
    pub state: ConversationState,
    /// 创建时间（Unix 秒）
    pub created_at: u64,
}

impl Checkpoint {
    pub(crate) fn new(thread_id: &str, state: ConversationState) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            state,
            created_at: now_secs(),
        }
    }
}

// ── Checkpointer trait ────────────────────────────────────────────────────────

/// 会话状态的持久化接口
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// 读取线程的最新快照（不存在返回 `None`）
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// 原子替换线程的快照，返回新快照 ID
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<String>;

    async fn delete(&self, thread_id: &str) -> Result<()>;

    /// 列出所有存在快照的线程
    async fn list_threads(&self) -> Result<Vec<String>>;

    /// 释放底层资源；之后的调用返回错误
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ── InMemoryCheckpointer ──────────────────────────────────────────────────────

/// 进程内存 Checkpointer，重启后状态丢失，适合测试
#[derive(Default)]
pub struct InMemoryCheckpointer {
    data: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.data.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<String> {
        let checkpoint = Checkpoint::new(thread_id, state.clone());
        let id = checkpoint.checkpoint_id.clone();
        self.data
            .write()
            .await
            .insert(thread_id.to_string(), checkpoint);
        debug!(thread_id, checkpoint_id = %id, "🔖 保存 Checkpoint");
        Ok(id)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.data.write().await.remove(thread_id);
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let mut threads: Vec<String> = self.data.read().await.keys().cloned().collect();
        threads.sort();
        Ok(threads)
    }
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_replaces_snapshot() {
        let cp = InMemoryCheckpointer::new();
        assert!(cp.load("t1").await.unwrap().is_none());

        let first = cp
            .save("t1", &ConversationState::new("q1").with_history("User: q1\nAssistant: a1"))
            .await
            .unwrap();
        let second = cp
            .save("t1", &ConversationState::new("q2").with_history("User: q2\nAssistant: a2"))
            .await
            .unwrap();
        assert_ne!(first, second);

        let loaded = cp.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, second);
        assert_eq!(loaded.state.question, "q2");
        assert_eq!(cp.list_threads().await.unwrap(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let cp = InMemoryCheckpointer::new();
        cp.save("b", &ConversationState::new("x")).await.unwrap();
        cp.save("a", &ConversationState::new("y")).await.unwrap();
        assert_eq!(cp.list_threads().await.unwrap(), vec!["a", "b"]);

        cp.delete("a").await.unwrap();
        assert!(cp.load("a").await.unwrap().is_none());
        // 删除不存在的线程不报错
        cp.delete("missing").await.unwrap();
        assert_eq!(cp.list_threads().await.unwrap(), vec!["b"]);
    }
}
