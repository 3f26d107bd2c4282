//! 工具系统
//!
//! 定义 [`Tool`] trait 和 [`ToolManager`]（注册、按名称执行）。
//! 目前唯一的内置工具是 [`retrieval::RetrievalTool`]。

pub mod retrieval;

use crate::error::{Result, ToolError};
use crate::llm::types::{ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 工具执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
        }
    }
}

pub type ToolParameters = HashMap<String, serde_json::Value>;

/// 回传给模型的工具错误文本前缀
pub const TOOL_ERROR_PREFIX: &str = "Tool error:";

/// 工具接口
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// 工具参数的 JSON Schema 定义
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, parameters: ToolParameters) -> Result<ToolResult>;
}

#[derive(Default)]
pub struct ToolManager {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub(crate) fn to_openai_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition::from_tool(&**tool))
            .collect()
    }

    pub async fn execute_tool(&self, name: &str, parameters: ToolParameters) -> Result<ToolResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = name, "执行工具");
        tool.execute(parameters).await
    }

    /// 执行一次模型发起的工具调用，返回回传给模型的文本
    pub async fn execute_call(&self, call: &ToolCall) -> Result<String> {
        let parameters: ToolParameters = if call.function.arguments.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ToolError::InvalidParameter {
                    name: "arguments".to_string(),
                    message: e.to_string(),
                }
            })?
        };
        let result = self.execute_tool(&call.function.name, parameters).await?;
        Ok(if result.success {
            result.output
        } else {
            format!("{TOOL_ERROR_PREFIX} {}", result.error.unwrap_or_default())
        })
    }
}
