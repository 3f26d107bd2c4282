//! LLM 配置加载
//!
//! 从环境变量读取模型配置，格式：
//! ```text
//! DOCQA_MODEL_<ID>_MODEL=gpt-4o-mini
//! DOCQA_MODEL_<ID>_BASEURL=https://api.openai.com/v1/chat/completions
//! DOCQA_MODEL_<ID>_APIKEY=sk-...
//! ```
//! `<ID>` 为自定义标识（如 `DEFAULT`、`QWEN`），不区分大小写。
//!
//! 注册表在进程启动时加载一次，由调用方持有，不存在全局缓存。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PREFIX: &str = "DOCQA_MODEL_";

/// 单个模型的连接配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    /// LLM 接口中使用的模型名（如 `gpt-4o-mini`）
    pub model: String,
    /// Chat Completions 接口完整 URL
    pub baseurl: String,
    pub apikey: String,
}

/// 已加载的模型配置表（key = 小写的 `<ID>`）
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelRegistry {
    pub models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    /// 读取 `.env` 与进程环境变量
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// 从任意键值对解析，便于测试
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut raw: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let Some((model_id, config_key)) = suffix.rsplit_once('_') else {
                return Err(ConfigError::EnvFormat(key).into());
            };
            let config_key = config_key.to_lowercase();
            if model_id.is_empty() || !matches!(config_key.as_str(), "model" | "baseurl" | "apikey")
            {
                return Err(ConfigError::EnvFormat(key).into());
            }
            raw.entry(model_id.to_lowercase())
                .or_default()
                .insert(config_key, value);
        }

        let mut models = HashMap::new();
        for (model_id, mut fields) in raw {
            let mut take = |field: &str| {
                fields
                    .remove(field)
                    .ok_or_else(|| ConfigError::MissingModelField(model_id.clone(), field.to_string()))
            };
            let config = ModelConfig {
                model: take("model")?,
                baseurl: take("baseurl")?,
                apikey: take("apikey")?,
            };
            models.insert(model_id, config);
        }
        Ok(Self { models })
    }

    pub fn get(&self, model_id: &str) -> Result<ModelConfig> {
        self.models
            .get(&model_id.to_lowercase())
            .cloned()
            .ok_or_else(|| ConfigError::ModelNotFound(model_id.to_string()).into())
    }
}
