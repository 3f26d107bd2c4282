//! Mock LLM 客户端，用于在不发起真实 HTTP 请求的情况下测试依赖 [`LlmClient`] 的组件。
//!
//! 典型用途：
//! - 测试各流水线阶段和 [`QaPipeline`](crate::pipeline::QaPipeline)
//! - 测试 [`MemoryCompactor`](crate::compression::MemoryCompactor)
//!
//! # 示例
//!
//! ```rust
//! use docqa_agent::testing::MockLlmClient;
//! use docqa_agent::llm::LlmClient;
//! use docqa_agent::llm::types::Message;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockLlmClient::new()
//!     .with_response("第一次响应")
//!     .with_response("第二次响应");
//!
//! let r1 = mock.invoke("system", vec![Message::user("hi".to_string())]).await.unwrap();
//! assert_eq!(r1.text, "第一次响应");
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::error::{LlmError, QaError, Result};
use crate::llm::types::{Message, ToolCall};
use crate::llm::{ChatBackend, LlmClient, ReasoningOutput, run_tool_loop};
use crate::tools::ToolManager;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 预设响应
enum MockLlmResponse {
    Content(String),
    /// 模型请求调用工具；执行后继续消费下一条响应
    ToolCalls(Vec<ToolCall>),
    Err(QaError),
}

/// 一次 `invoke` / `invoke_with_tools` 调用的记录
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system_role: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// 可脚本化的 Mock LLM 客户端。
///
/// 按顺序返回预设的响应；队列耗尽后返回 `EmptyResponse` 错误。
/// 工具调用响应经由与 [`HttpLlmClient`](crate::llm::HttpLlmClient) 相同的工具循环，
/// 通过传入的 [`ToolManager`] 真实执行：参数错误回传给“模型”，其余错误直接返回。
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<MockLlmResponse>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    next_call_id: Mutex<usize>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// 创建空 Mock，尚未设置任何响应
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            next_call_id: Mutex::new(0),
        }
    }

    /// 追加一条成功响应文本
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(MockLlmResponse::Content(text.into()))
    }

    /// 批量追加多条成功响应
    pub fn with_responses(self, texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        texts
            .into_iter()
            .fold(self, |mock, text| mock.with_response(text))
    }

    /// 追加一次工具调用
    pub fn with_tool_call(self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let id = {
            let mut next = self.next_call_id.lock().unwrap();
            *next += 1;
            format!("call_{}", *next)
        };
        self.push(MockLlmResponse::ToolCalls(vec![ToolCall::function(
            id,
            name,
            arguments.to_string(),
        )]))
    }

    /// 追加一条错误响应（用于测试错误处理路径）
    pub fn with_error(self, err: QaError) -> Self {
        self.push(MockLlmResponse::Err(err))
    }

    /// 追加一条网络错误（常用的便捷方法）
    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(QaError::Llm(LlmError::NetworkError(msg.into())))
    }

    fn push(self, response: MockLlmResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// 已发生的调用总次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 最后一次调用时传入的 messages（若从未调用则返回 `None`）
    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().map(|c| c.messages.clone())
    }

    /// 最后一次调用时的系统角色
    pub fn last_system_role(&self) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|c| c.system_role.clone())
    }

    /// 最后一次调用时可用的工具名
    pub fn last_tool_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|c| c.tool_names.clone())
            .unwrap_or_default()
    }

    /// 所有历史调用（按时序排列）
    pub fn all_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// 剩余未消费的预设响应数量
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next_response(&self) -> Option<MockLlmResponse> {
        self.responses.lock().unwrap().pop_front()
    }
}

/// 脚本里连续工具调用的上限，足够任何测试场景
const MOCK_MAX_TOOL_ITERATIONS: usize = 16;

#[async_trait]
impl ChatBackend for MockLlmClient {
    async fn complete(&self, _messages: Vec<Message>, _tools: &ToolManager) -> Result<Message> {
        match self.next_response() {
            Some(MockLlmResponse::Content(text)) => Ok(Message::assistant(text)),
            Some(MockLlmResponse::ToolCalls(calls)) => Ok(Message::assistant_with_tools(calls)),
            Some(MockLlmResponse::Err(e)) => Err(e),
            None => Err(QaError::Llm(LlmError::EmptyResponse)),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn invoke_with_tools(
        &self,
        system_role: &str,
        messages: Vec<Message>,
        tools: &ToolManager,
    ) -> Result<ReasoningOutput> {
        let mut tool_names: Vec<String> = tools.tool_names().into_iter().map(String::from).collect();
        tool_names.sort();
        self.calls.lock().unwrap().push(MockCall {
            system_role: system_role.to_string(),
            messages: messages.clone(),
            tool_names,
        });

        run_tool_loop(self, system_role, messages, tools, MOCK_MAX_TOOL_ITERATIONS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exhausted_queue_errors() {
        let mock = MockLlmClient::new().with_responses(["a"]);
        assert_eq!(mock.invoke("s", vec![]).await.unwrap().text, "a");
        assert!(matches!(
            mock.invoke("s", vec![]).await,
            Err(QaError::Llm(LlmError::EmptyResponse))
        ));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let mock = MockLlmClient::new()
            .with_tool_call("missing_tool", serde_json::json!({}))
            .with_response("recovered");
        let output = mock.invoke("s", vec![]).await.unwrap();
        assert_eq!(output.text, "recovered");
        assert!(output.last_tool_result().unwrap().contains("missing_tool"));
    }

    #[tokio::test]
    async fn test_error_after_tool_call_surfaces() {
        let mock = MockLlmClient::new()
            .with_tool_call("missing_tool", serde_json::json!({}))
            .with_network_error("reset by peer");
        assert!(matches!(
            mock.invoke("s", vec![]).await,
            Err(QaError::Llm(LlmError::NetworkError(_)))
        ));
        assert_eq!(mock.remaining(), 0);
    }
}
