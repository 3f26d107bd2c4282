//! 会话记忆持久化
//!
//! | 组件 | 作用 |
//! |------|------|
//! | [`Checkpointer`] | 按 `thread_id` 保存 / 读取最新的 [`ConversationState`](crate::state::ConversationState) 快照 |
//! | [`SqliteCheckpointer`] | SQLite 实现，经 `sqlx` 连接池访问，失联时重建连接池 |
//! | [`PoolConfig`] | 连接池规模与回收参数 |
//!
//! 单次执行内的短期上下文（历史压缩）见 [`crate::compression`]。
//!
//! ```rust,no_run
//! use docqa_agent::memory::{Checkpointer, PoolConfig, SqliteCheckpointer};
//! use docqa_agent::state::ConversationState;
//!
//! # async fn example() -> docqa_agent::error::Result<()> {
//! let cp = SqliteCheckpointer::open("/tmp/docqa/checkpoints.db", PoolConfig::default()).await?;
//! cp.save("thread-1", &ConversationState::new("What is IVF?")).await?;
//! let latest = cp.load("thread-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpointer;
pub mod sqlite;

pub use checkpointer::{Checkpoint, Checkpointer, InMemoryCheckpointer};
pub use sqlite::{PoolConfig, SqliteCheckpointer};
