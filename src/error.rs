use crate::pipeline::StageName;
use std::time::Duration;
use thiserror::Error;

/// 文档问答项目的统一错误类型
#[derive(Debug, Error)]
pub enum QaError {
    /// LLM 相关错误
    #[error("LLM Error: {0}")]
    Llm(#[from] LlmError),
    /// 工具执行错误
    #[error("Tool Error: {0}")]
    Tool(#[from] ToolError),
    /// 检索服务错误
    #[error("Retrieval Error: {0}")]
    Retrieval(#[from] RetrievalError),
    /// 某个流水线阶段失败，携带阶段名与原始错误
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: Box<QaError>,
    },
    /// 状态不满足阶段契约
    #[error("State Error: {0}")]
    State(#[from] StateError),
    /// 持久化错误
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
    /// 会话层错误
    #[error("Conversation Error: {0}")]
    Conversation(#[from] ConversationError),
    /// 配置错误
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    /// IO 错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 调用方取消了本轮执行
    #[error("Execution cancelled")]
    Cancelled,
    /// 其他错误
    #[error("Error: {0}")]
    Other(String),
}

impl QaError {
    /// 用阶段名包装错误；已经带阶段信息的错误原样返回
    pub fn in_stage(self, stage: StageName) -> Self {
        match self {
            err @ QaError::Stage { .. } => err,
            other => QaError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// 失败阶段（仅对 `Stage` 变体有值）
    pub fn failed_stage(&self) -> Option<StageName> {
        match self {
            QaError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// LLM 相关错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 网络请求失败
    #[error("Network error: {0}")]
    NetworkError(String),
    /// API 返回错误状态码
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
    /// 响应格式无效
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// 没有返回内容
    #[error("Empty response from LLM")]
    EmptyResponse,
    /// 工具调用循环超过上限仍未给出文本回复
    #[error("Tool loop exhausted after {0} iterations")]
    ToolLoopExhausted(usize),
}

/// 工具执行错误
#[derive(Debug, Error)]
pub enum ToolError {
    /// 工具未找到
    #[error("Tool '{0}' not found")]
    NotFound(String),
    /// 参数缺失
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    /// 参数类型错误
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },
}

/// 检索服务错误
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Search backend unreachable: {0}")]
    Unreachable(String),
    #[error("Search backend returned status {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}

/// 阶段收到了不完整的状态（编程契约被破坏，必须立即失败）
#[derive(Debug, Error)]
pub enum StateError {
    #[error("stage '{stage}' requires field '{field}' but it is absent")]
    MissingField {
        stage: StageName,
        field: &'static str,
    },
}

/// Checkpoint 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 重连之后仍无法访问后端
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    /// 连接池在限定时间内没有空闲连接
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),
    /// 连接池已关闭
    #[error("connection pool is closed")]
    Closed,
    /// 后端执行语句失败（非连接问题）
    #[error("backend error: {0}")]
    Backend(String),
    /// 快照序列化 / 反序列化失败
    #[error("snapshot serialization error: {0}")]
    Serialization(String),
}

/// 会话层错误
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation '{0}' not found")]
    NotFound(String),
    #[error("question must be a non-empty string")]
    EmptyQuestion,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),
    /// 配置解析失败
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),
    /// 配置值无效
    #[error("Invalid config value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
    /// 环境变量格式不符合 `DOCQA_MODEL_<ID>_<KEY>`
    #[error("Malformed model env var: {0}")]
    EnvFormat(String),
    /// 模型缺少某项配置
    #[error("Model '{0}' is missing '{1}'")]
    MissingModelField(String, String),
    /// 找不到模型
    #[error("Model '{0}' is not configured")]
    ModelNotFound(String),
}

impl From<reqwest::Error> for QaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QaError::Llm(LlmError::NetworkError("Request timeout".to_string()))
        } else if err.is_connect() {
            QaError::Llm(LlmError::NetworkError(format!("Connection failed: {}", err)))
        } else {
            QaError::Llm(LlmError::NetworkError(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for QaError {
    fn from(err: serde_json::Error) -> Self {
        QaError::Llm(LlmError::InvalidResponse(err.to_string()))
    }
}

impl From<serde_yaml::Error> for QaError {
    fn from(err: serde_yaml::Error) -> Self {
        QaError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, QaError>;
