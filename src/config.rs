//! 应用配置
//!
//! 从 YAML 读取，所有字段都有默认值，缺省的段落可以整体省略：
//!
//! ```yaml
//! model: default
//! retrieval:
//!   endpoint: http://localhost:8000/search
//!   top_k: 6
//! memory:
//!   summarization_threshold: 5
//!   recent_turns_to_keep: 3
//! store:
//!   path: ~/.docqa/checkpoints.db
//!   pool:
//!     min_size: 1
//!     max_size: 5
//! ```
//!
//! 模型凭据不放在这里，见 [`ModelRegistry`](crate::llm::config::ModelRegistry)。

use crate::compression::CompactionConfig;
use crate::error::{ConfigError, Result};
use crate::memory::PoolConfig;
use crate::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 各推理阶段使用的模型 ID
    pub model: String,
    pub retrieval: RetrievalSettings,
    pub memory: MemorySettings,
    pub store: StoreSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            retrieval: RetrievalSettings::default(),
            memory: MemorySettings::default(),
            store: StoreSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// 检索服务地址
    pub endpoint: String,
    pub top_k: usize,
    /// 检索阶段单轮内允许的工具调用迭代次数
    pub max_tool_iterations: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/search".to_string(),
            top_k: 6,
            max_tool_iterations: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// 历史轮数超过该值时触发压缩
    pub summarization_threshold: usize,
    /// 压缩后原样保留的最近轮数
    pub recent_turns_to_keep: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            summarization_threshold: 5,
            recent_turns_to_keep: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub pool: PoolSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.docqa/checkpoints.db"),
            pool: PoolSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    /// 0 表示不限
    pub max_lifetime_secs: u64,
    /// 0 表示不限
    pub max_idle_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 5,
            max_lifetime_secs: 1800,
            max_idle_secs: 300,
            acquire_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        // 空文件等价于全部默认
        let config: AppConfig = if raw.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k", "must be at least 1"));
        }
        if self.memory.recent_turns_to_keep == 0 {
            return Err(invalid("memory.recent_turns_to_keep", "must be at least 1"));
        }
        let pool = &self.store.pool;
        if pool.max_size == 0 {
            return Err(invalid("store.pool.max_size", "must be at least 1"));
        }
        if pool.min_size > pool.max_size {
            return Err(invalid(
                "store.pool.min_size",
                &format!("{} exceeds max_size {}", pool.min_size, pool.max_size),
            ));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.retrieval.top_k,
            compaction: CompactionConfig {
                threshold: self.memory.summarization_threshold,
                keep_recent: self.memory.recent_turns_to_keep,
            },
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        let secs = |n: u64| (n > 0).then(|| Duration::from_secs(n));
        let pool = &self.store.pool;
        PoolConfig {
            min_size: pool.min_size,
            max_size: pool.max_size,
            max_lifetime: secs(pool.max_lifetime_secs),
            max_idle: secs(pool.max_idle_secs),
            acquire_timeout: Duration::from_secs(pool.acquire_timeout_secs),
        }
    }

    /// 展开 `~` 后的数据库路径
    pub fn store_path(&self) -> PathBuf {
        expand_tilde(&self.store.path)
    }
}

fn invalid(field: &str, message: &str) -> crate::error::QaError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
        {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QaError;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pipeline_config(), PipelineConfig::default());

        let pool = config.pool_config();
        assert_eq!(pool.max_lifetime, Some(Duration::from_secs(1800)));
        assert_eq!(pool.max_idle, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_partial_yaml() {
        let config = AppConfig::from_yaml(
            "model: high\nmemory:\n  recent_turns_to_keep: 2\nstore:\n  pool:\n    max_size: 8\n    max_idle_secs: 0\n",
        )
        .unwrap();
        assert_eq!(config.model, "high");
        assert_eq!(config.memory.summarization_threshold, 5);
        assert_eq!(config.pipeline_config().compaction.keep_recent, 2);
        assert_eq!(config.pool_config().max_size, 8);
        assert_eq!(config.pool_config().max_idle, None);
        assert_eq!(config.retrieval.top_k, 6);
    }

    #[test]
    fn test_validation() {
        for yaml in [
            "memory:\n  recent_turns_to_keep: 0\n",
            "retrieval:\n  top_k: 0\n",
            "store:\n  pool:\n    max_size: 0\n    min_size: 0\n",
            "store:\n  pool:\n    min_size: 6\n    max_size: 5\n",
        ] {
            let err = AppConfig::from_yaml(yaml).unwrap_err();
            assert!(
                matches!(err, QaError::Config(ConfigError::InvalidValue { .. })),
                "{yaml}: {err}"
            );
        }
    }

    #[test]
    fn test_malformed_yaml() {
        let err = AppConfig::from_yaml("retrieval: [1, 2").unwrap_err();
        assert!(matches!(err, QaError::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, QaError::Config(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/abs/c.db")), PathBuf::from("/abs/c.db"));
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_tilde(Path::new("~/.docqa/c.db")),
                PathBuf::from(home).join(".docqa/c.db")
            );
        }
    }
}
