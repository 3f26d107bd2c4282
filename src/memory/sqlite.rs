//! SQLite 持久化 Checkpointer
//!
//! 每个线程一行：`checkpoints(thread_id PRIMARY KEY, checkpoint_id, state JSON, created_at)`。
//! 连接由 [`SqlitePool`] 管理：`min_size` / `max_size` 限定规模，借出前探活，
//! 超过 `max_lifetime` 或空闲超过 `max_idle` 的连接被回收，池子始终补足到 `min_size`。
//!
//! 后端失联时（连接打不开 / IO 失败），当前操作会重建连接池并重试一次；
//! 仍失败则返回 [`StoreError::Unavailable`]，不会无限重试。

use super::checkpointer::{Checkpoint, Checkpointer};
use crate::error::{Result, StoreError};
use crate::state::ConversationState;
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id     TEXT PRIMARY KEY,
    checkpoint_id TEXT NOT NULL,
    state         TEXT NOT NULL,
    created_at    INTEGER NOT NULL
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// SQLite 主结果码：SQLITE_IOERR / SQLITE_CANTOPEN
const SQLITE_IOERR: i32 = 10;
const SQLITE_CANTOPEN: i32 = 14;

// ── 连接池参数 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// 连接最长存活时间
    pub max_lifetime: Option<Duration>,
    /// 连接最长空闲时间
    pub max_idle: Option<Duration>,
    /// 等待空闲连接的超时
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 5,
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            max_idle: Some(Duration::from_secs(5 * 60)),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

async fn connect_pool(path: &Path, config: &PoolConfig) -> std::result::Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_size as u32)
        .max_connections(config.max_size as u32)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.max_idle)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {e}", path.display())))?;

    sqlx::query(SCHEMA)
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schema setup failed: {e}")))?;
    Ok(pool)
}

fn map_sqlx_err(err: sqlx::Error, acquire_timeout: Duration) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(acquire_timeout),
        sqlx::Error::PoolClosed => StoreError::Closed,
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(ref db)
            if db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_IOERR | SQLITE_CANTOPEN)) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

// ── SqliteCheckpointer ────────────────────────────────────────────────────────

/// 当前连接池及其代数；每次重建代数加一，避免并发失败时重复重建
struct PoolSlot {
    generation: u64,
    pool: SqlitePool,
}

pub struct SqliteCheckpointer {
    slot: RwLock<PoolSlot>,
    path: PathBuf,
    config: PoolConfig,
    closed: AtomicBool,
}

impl SqliteCheckpointer {
    /// 打开（或创建）数据库文件，自动建父目录并预热连接池
    pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        if config.max_size == 0 || config.min_size > config.max_size {
            return Err(StoreError::Backend(format!(
                "invalid pool bounds: min_size={} max_size={}",
                config.min_size, config.max_size
            ))
            .into());
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let pool = connect_pool(&path, &config).await?;
        info!(
            path = %path.display(),
            min_size = config.min_size,
            max_size = config.max_size,
            "🗂️ SqliteCheckpointer 初始化"
        );
        Ok(Self {
            slot: RwLock::new(PoolSlot { generation: 0, pool }),
            path,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前使用的连接池
    pub async fn pool(&self) -> SqlitePool {
        self.slot.read().await.pool.clone()
    }

    async fn current(&self) -> (u64, SqlitePool) {
        let slot = self.slot.read().await;
        (slot.generation, slot.pool.clone())
    }

    /// 丢弃当前连接池并按原参数重建
    pub async fn reset(&self) -> Result<()> {
        let generation = self.slot.read().await.generation;
        Ok(self.reset_from(generation).await?)
    }

    async fn reset_from(&self, seen: u64) -> std::result::Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let mut slot = self.slot.write().await;
        if slot.generation != seen {
            // 其他任务已经重建过
            return Ok(());
        }
        let fresh = connect_pool(&self.path, &self.config).await?;
        let stale = std::mem::replace(&mut slot.pool, fresh);
        slot.generation += 1;
        info!(generation = slot.generation, "♻️ 连接池已重建");
        drop(slot);

        // 借出中的连接归还后才会真正关闭，不阻塞当前操作
        tokio::spawn(async move { stale.close().await });
        Ok(())
    }

    /// 在当前连接池上执行 `f`；连接层失败时重建连接池后重试一次
    async fn with_retry<T, F, Fut>(&self, op: &'static str, f: F) -> std::result::Result<T, StoreError>
    where
        F: Fn(SqlitePool) -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let timeout = self.config.acquire_timeout;
        let (generation, pool) = self.current().await;
        let first_failure = match f(pool).await.map_err(|e| map_sqlx_err(e, timeout)) {
            Err(StoreError::Unavailable(msg)) => msg,
            other => return other,
        };

        warn!(op, error = %first_failure, "⚠️ Checkpoint 存储连接失效，重建连接池后重试");
        self.reset_from(generation).await?;

        let (_, pool) = self.current().await;
        f(pool).await.map_err(|e| match map_sqlx_err(e, timeout) {
            StoreError::Unavailable(msg) => {
                StoreError::Unavailable(format!("{op} failed after reconnect: {msg}"))
            }
            other => other,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = self
            .with_retry("load", |pool| async move {
                sqlx::query_as::<_, (String, String, i64)>(
                    "SELECT checkpoint_id, state, created_at FROM checkpoints WHERE thread_id = ?1",
                )
                .bind(thread_id)
                .fetch_optional(&pool)
                .await
            })
            .await?;

        let Some((checkpoint_id, raw, created_at)) = row else {
            return Ok(None);
        };
        let state: ConversationState = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Serialization(format!("thread {thread_id}: {e}")))?;
        Ok(Some(Checkpoint {
            thread_id: thread_id.to_string(),
            checkpoint_id,
            state,
            created_at: created_at.max(0) as u64,
        }))
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<String> {
        let checkpoint = Checkpoint::new(thread_id, state.clone());
        let raw = serde_json::to_string(&checkpoint.state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let checkpoint_id = checkpoint.checkpoint_id.as_str();
        let created_at = checkpoint.created_at as i64;
        let raw = raw.as_str();

        self.with_retry("save", |pool| async move {
            let mut tx = pool.begin().await?;
            sqlx::query(
                "INSERT INTO checkpoints (thread_id, checkpoint_id, state, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(thread_id) DO UPDATE SET
                     checkpoint_id = excluded.checkpoint_id,
                     state = excluded.state,
                     created_at = excluded.created_at",
            )
            .bind(thread_id)
            .bind(checkpoint_id)
            .bind(raw)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        })
        .await?;

        debug!(thread_id, checkpoint_id, "🔖 保存 Checkpoint");
        Ok(checkpoint.checkpoint_id)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.with_retry("delete", |pool| async move {
            sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1")
                .bind(thread_id)
                .execute(&pool)
                .await
        })
        .await?;
        info!(thread_id, "🗑️ 会话 Checkpoint 已删除");
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        Ok(self
            .with_retry("list_threads", |pool| async move {
                sqlx::query_scalar::<_, String>("SELECT thread_id FROM checkpoints ORDER BY thread_id")
                    .fetch_all(&pool)
                    .await
            })
            .await?)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.pool().await.close().await;
        info!("连接池已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QaError;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn pool_config() -> PoolConfig {
        PoolConfig {
            min_size: 2,
            max_size: 4,
            ..PoolConfig::default()
        }
    }

    fn connection_lost() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::other("server closed the connection"))
    }

    fn sample_state(question: &str) -> ConversationState {
        ConversationState::new(question)
            .with_history(format!("User: {question}\nAssistant: answer"))
            .with_summary("earlier turns")
            .with_scope("doc-1")
    }

    async fn open_temp(dir: &tempfile::TempDir, config: PoolConfig) -> SqliteCheckpointer {
        SqliteCheckpointer::open(dir.path().join("c.db"), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.db");

        let cp = SqliteCheckpointer::open(&path, pool_config()).await.unwrap();
        let id = cp.save("t1", &sample_state("q1")).await.unwrap();
        cp.close().await.unwrap();

        let cp = SqliteCheckpointer::open(&path, pool_config()).await.unwrap();
        let loaded = cp.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, id);
        assert_eq!(loaded.state, sample_state("q1"));
        assert!(cp.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_row() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;

        cp.save("t1", &sample_state("q1")).await.unwrap();
        let second = cp.save("t1", &sample_state("q2")).await.unwrap();
        cp.save("t2", &sample_state("other")).await.unwrap();

        let loaded = cp.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, second);
        assert_eq!(loaded.state.question, "q2");
        assert_eq!(cp.list_threads().await.unwrap(), vec!["t1", "t2"]);

        cp.delete("t1").await.unwrap();
        assert!(cp.load("t1").await.unwrap().is_none());
        assert_eq!(cp.list_threads().await.unwrap(), vec!["t2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_threads_stay_within_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Arc::new(open_temp(&dir, pool_config()).await);

        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let cp = cp.clone();
                tokio::spawn(async move {
                    let thread = format!("t{i:02}");
                    cp.save(&thread, &sample_state(&thread)).await.unwrap();
                    cp.load(&thread).await.unwrap().unwrap()
                })
            })
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            let loaded = task.await.unwrap();
            assert_eq!(loaded.state.question, format!("t{i:02}"));
        }
        assert_eq!(cp.list_threads().await.unwrap().len(), 12);
        assert!(cp.pool().await.size() <= 4);
    }

    #[tokio::test]
    async fn test_min_size_kept_after_reset() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;
        assert!(cp.pool().await.size() >= 2);

        cp.save("t1", &sample_state("q1")).await.unwrap();
        let before = cp.pool().await;
        cp.reset().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let after = cp.pool().await;
        assert!(before.is_closed());
        assert!(after.size() >= 2, "pool shrank to {}", after.size());
        // 重建后数据照常可读
        assert_eq!(cp.load("t1").await.unwrap().unwrap().state.question, "q1");
    }

    #[tokio::test]
    async fn test_min_size_kept_after_idle_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(
            &dir,
            PoolConfig {
                max_idle: Some(Duration::from_millis(50)),
                max_lifetime: Some(Duration::from_millis(100)),
                ..pool_config()
            },
        )
        .await;

        // 过期回收与补足由后台维护任务完成，给它几个周期
        tokio::time::sleep(Duration::from_millis(400)).await;
        let mut size = 0;
        for _ in 0..20 {
            size = cp.pool().await.size();
            if size >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(size >= 2, "pool shrank to {size}");
        cp.save("t1", &sample_state("q1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_store_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;
        cp.close().await.unwrap();
        assert!(matches!(
            cp.load("t1").await,
            Err(QaError::Store(StoreError::Closed))
        ));
        assert!(matches!(
            cp.reset().await,
            Err(QaError::Store(StoreError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_unopenable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let err = SqliteCheckpointer::open(blocker.join("c.db"), pool_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QaError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_bounds() {
        let dir = tempfile::tempdir().unwrap();
        for (min_size, max_size) in [(3, 2), (0, 0)] {
            let config = PoolConfig {
                min_size,
                max_size,
                ..PoolConfig::default()
            };
            assert!(SqliteCheckpointer::open(dir.path().join("c.db"), config).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_retry_once_after_reset() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;
        let attempts = AtomicUsize::new(0);

        let value = cp
            .with_retry("select_constant", |pool| {
                let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        return Err(connection_lost());
                    }
                    sqlx::query_scalar::<_, i64>("SELECT 42").fetch_one(&pool).await
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cp.slot.read().await.generation, 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_second_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;
        let attempts = AtomicUsize::new(0);

        let err = cp
            .with_retry("always_down", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(connection_lost()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_statement_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cp = open_temp(&dir, pool_config()).await;
        let attempts = AtomicUsize::new(0);

        let err = cp
            .with_retry("bad_sql", |pool| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { sqlx::query("SELEC nothing").execute(&pool).await.map(|_| ()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
