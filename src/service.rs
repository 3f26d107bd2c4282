//! 会话服务
//!
//! 把“提问”请求接到流水线与 Checkpointer 上：
//!
//! 1. 校验问题非空、线程存在
//! 2. 获取该线程的互斥锁（同一线程的多次提问串行执行，不同线程互不影响）
//! 3. 读取上一轮快照，叠加新问题与线程的 `scope_id` 构造初始状态
//! 4. 执行流水线，成功后整体保存快照
//! 5. 把问答写入审计日志并返回结果
//!
//! 取消只会发生在保存之前：一旦流水线返回，快照一定完整写入或完全不写。

use crate::error::{ConversationError, QaError, Result, StateError};
use crate::memory::checkpointer::now_secs;
use crate::memory::Checkpointer;
use crate::pipeline::{QaPipeline, StageName};
use crate::state::ConversationState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── 线程登记 ──────────────────────────────────────────────────────────────────

/// 审计日志中的发言方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMessage {
    pub role: MessageRole,
    pub content: String,
    /// Unix 秒
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub scope_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// 审计日志条数
    pub message_count: usize,
}

/// 会话线程的登记与审计日志
#[async_trait]
pub trait ThreadRegistry: Send + Sync {
    async fn create(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord>;

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadRecord>>;

    async fn set_scope(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord>;

    /// 删除线程及其审计日志，返回是否存在过
    async fn delete(&self, thread_id: &str) -> Result<bool>;

    /// 按创建时间排序
    async fn list(&self) -> Result<Vec<ThreadRecord>>;

    async fn append_message(&self, thread_id: &str, role: MessageRole, content: &str) -> Result<()>;

    /// 最近的 `limit` 条审计消息（按时间正序）；`None` 表示全部
    async fn messages(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<AuditMessage>>;
}

struct ThreadEntry {
    record: ThreadRecord,
    messages: Vec<AuditMessage>,
}

/// 进程内存登记表
#[derive(Default)]
pub struct InMemoryThreadRegistry {
    threads: RwLock<HashMap<String, ThreadEntry>>,
}

impl InMemoryThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(thread_id: &str) -> QaError {
    ConversationError::NotFound(thread_id.to_string()).into()
}

#[async_trait]
impl ThreadRegistry for InMemoryThreadRegistry {
    async fn create(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord> {
        let now = now_secs();
        let record = ThreadRecord {
            thread_id: thread_id.to_string(),
            scope_id,
            created_at: now,
            updated_at: now,
            message_count: 0,
        };
        self.threads.write().await.insert(
            thread_id.to_string(),
            ThreadEntry {
                record: record.clone(),
                messages: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .map(|e| e.record.clone()))
    }

    async fn set_scope(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord> {
        let mut threads = self.threads.write().await;
        let entry = threads.get_mut(thread_id).ok_or_else(|| not_found(thread_id))?;
        entry.record.scope_id = scope_id;
        entry.record.updated_at = now_secs();
        Ok(entry.record.clone())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<ThreadRecord>> {
        let mut records: Vec<ThreadRecord> = self
            .threads
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.thread_id.cmp(&b.thread_id))
        });
        Ok(records)
    }

    async fn append_message(&self, thread_id: &str, role: MessageRole, content: &str) -> Result<()> {
        let mut threads = self.threads.write().await;
        let entry = threads.get_mut(thread_id).ok_or_else(|| not_found(thread_id))?;
        let now = now_secs();
        entry.messages.push(AuditMessage {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        entry.record.message_count = entry.messages.len();
        entry.record.updated_at = now;
        Ok(())
    }

    async fn messages(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<AuditMessage>> {
        let threads = self.threads.read().await;
        let entry = threads.get(thread_id).ok_or_else(|| not_found(thread_id))?;
        let skip = limit.map_or(0, |n| entry.messages.len().saturating_sub(n));
        Ok(entry.messages[skip..].to_vec())
    }
}

// ── 线程锁 ────────────────────────────────────────────────────────────────────

type ThreadMutex = Arc<tokio::sync::Mutex<()>>;

/// 按线程 ID 分配的互斥锁。
///
/// 表项只在有人持有或等待时存在：最后一个 [`ThreadLease`] 释放时移除，
/// 所以表的大小等于当前活跃的线程数。
#[derive(Default)]
struct ThreadLocks {
    table: Mutex<HashMap<String, ThreadMutex>>,
}

impl ThreadLocks {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, ThreadMutex>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 登记对 `thread_id` 的使用；返回的租约离开作用域时自动清理
    fn lease(&self, thread_id: &str) -> ThreadLease<'_> {
        let mutex = self.table().entry(thread_id.to_string()).or_default().clone();
        ThreadLease {
            locks: self,
            thread_id: thread_id.to_string(),
            mutex,
        }
    }

    fn len(&self) -> usize {
        self.table().len()
    }
}

struct ThreadLease<'a> {
    locks: &'a ThreadLocks,
    thread_id: String,
    mutex: ThreadMutex,
}

impl Drop for ThreadLease<'_> {
    fn drop(&mut self) {
        // 克隆只发生在表锁内，计数为 2（表 + 自己）说明没有其他持有者或等待者
        let mut table = self.locks.table();
        if Arc::strong_count(&self.mutex) == 2
            && table
                .get(&self.thread_id)
                .is_some_and(|current| Arc::ptr_eq(current, &self.mutex))
        {
            table.remove(&self.thread_id);
        }
    }
}

// ── ConversationService ───────────────────────────────────────────────────────

/// 一次提问的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub context: String,
    pub conversation_history: String,
}

pub struct ConversationService {
    pipeline: Arc<QaPipeline>,
    checkpointer: Arc<dyn Checkpointer>,
    registry: Arc<dyn ThreadRegistry>,
    locks: ThreadLocks,
}

impl ConversationService {
    pub fn new(
        pipeline: Arc<QaPipeline>,
        checkpointer: Arc<dyn Checkpointer>,
        registry: Arc<dyn ThreadRegistry>,
    ) -> Self {
        Self {
            pipeline,
            checkpointer,
            registry,
            locks: ThreadLocks::default(),
        }
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    async fn require_thread(&self, thread_id: &str) -> Result<ThreadRecord> {
        self.registry
            .get(thread_id)
            .await?
            .ok_or_else(|| not_found(thread_id))
    }

    /// 新建会话线程，返回线程 ID
    pub async fn begin_conversation(&self, scope_id: Option<String>) -> Result<String> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        self.registry.create(&thread_id, scope_id.clone()).await?;
        info!(thread_id = %thread_id, scope_id = ?scope_id, "🧵 新建会话");
        Ok(thread_id)
    }

    /// 接续一个已有线程。
    ///
    /// 登记表里没有、但存在快照的线程（例如进程重启后）会重新登记；
    /// 未指定 `scope_id` 时沿用快照中的值。
    pub async fn resume_conversation(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord> {
        if let Some(record) = self.registry.get(thread_id).await? {
            return match scope_id {
                Some(scope) => self.registry.set_scope(thread_id, Some(scope)).await,
                None => Ok(record),
            };
        }

        let checkpoint = self
            .checkpointer
            .load(thread_id)
            .await?
            .ok_or_else(|| not_found(thread_id))?;
        let scope_id = scope_id.or(checkpoint.state.scope_id);
        info!(thread_id, "🔁 从快照恢复会话");
        self.registry.create(thread_id, scope_id).await
    }

    pub async fn ask(&self, thread_id: &str, question: &str) -> Result<AskResponse> {
        self.ask_with_cancel(thread_id, question, CancellationToken::new())
            .await
    }

    /// 提问；`cancel` 触发时放弃本轮，不写快照
    pub async fn ask_with_cancel(
        &self,
        thread_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ConversationError::EmptyQuestion.into());
        }
        let record = self.require_thread(thread_id).await?;

        let lease = self.locks.lease(thread_id);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QaError::Cancelled),
            guard = lease.mutex.lock() => guard,
        };

        self.registry
            .append_message(thread_id, MessageRole::User, question)
            .await?;

        let run = async {
            let prior = self.checkpointer.load(thread_id).await?.map(|cp| cp.state);
            let initial = ConversationState::seeded(prior, question, record.scope_id.clone());
            self.pipeline.run(initial, thread_id).await
        };
        let state = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(thread_id, "⏹️ 本轮已取消，未保存快照");
                return Err(QaError::Cancelled);
            }
            result = run => result?,
        };

        self.checkpointer.save(thread_id, &state).await?;

        let answer = state.answer.clone().ok_or(StateError::MissingField {
            stage: StageName::Verification,
            field: "answer",
        })?;
        self.registry
            .append_message(thread_id, MessageRole::Assistant, &answer)
            .await?;

        Ok(AskResponse {
            answer,
            context: state.context.unwrap_or_default(),
            conversation_history: state.conversation_history.unwrap_or_default(),
        })
    }

    pub async fn set_scope(&self, thread_id: &str, scope_id: Option<String>) -> Result<ThreadRecord> {
        self.registry.set_scope(thread_id, scope_id).await
    }

    /// 删除线程：登记、审计日志与快照一并删除
    pub async fn delete_conversation(&self, thread_id: &str) -> Result<()> {
        let lease = self.locks.lease(thread_id);
        let _guard = lease.mutex.lock().await;

        let had_checkpoint = self.checkpointer.load(thread_id).await?.is_some();
        let registered = self.registry.delete(thread_id).await?;
        if !registered && !had_checkpoint {
            return Err(not_found(thread_id));
        }
        self.checkpointer.delete(thread_id).await?;

        info!(thread_id, "🗑️ 会话已删除");
        Ok(())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ThreadRecord>> {
        self.registry.list().await
    }

    pub async fn messages(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<AuditMessage>> {
        self.registry.messages(thread_id, limit).await
    }

    /// 关闭底层存储
    pub async fn shutdown(&self) -> Result<()> {
        self.checkpointer.close().await
    }
}
