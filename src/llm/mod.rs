//! 推理能力（Reasoning Capability）
//!
//! 流水线的每个阶段只依赖 [`LlmClient`] 的 `invoke` 契约：
//! 给定系统角色与消息序列，返回文本以及本轮完整的消息记录。
//! 检索阶段使用 [`LlmClient::invoke_with_tools`]，模型可以在回合中调用检索工具。

mod client;
pub mod config;
pub mod types;

use crate::error::{LlmError, QaError, Result};
use crate::llm::client::{assemble_req_header, post};
use crate::llm::config::ModelConfig;
use crate::llm::types::{ChatCompletionRequest, Message};
use crate::tools::{TOOL_ERROR_PREFIX, ToolManager};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

/// 一次推理调用的结果
#[derive(Debug, Clone, Default)]
pub struct ReasoningOutput {
    /// 模型最终给出的文本
    pub text: String,
    /// 本轮产生的全部消息（不含输入），包含工具调用与工具结果
    pub messages: Vec<Message>,
}

impl ReasoningOutput {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            messages: vec![Message::assistant(text.clone())],
            text,
        }
    }

    /// 最近一条工具结果的内容；多次调用工具时取最后一次
    pub fn last_tool_result(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_tool_result())
            .and_then(|m| m.content.as_deref())
    }
}

/// 推理能力接口
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 无工具调用
    async fn invoke(&self, system_role: &str, messages: Vec<Message>) -> Result<ReasoningOutput> {
        self.invoke_with_tools(system_role, messages, &ToolManager::new())
            .await
    }

    /// 允许模型在回合中调用 `tools` 中注册的工具
    async fn invoke_with_tools(
        &self,
        system_role: &str,
        messages: Vec<Message>,
        tools: &ToolManager,
    ) -> Result<ReasoningOutput>;
}

/// 基于 OpenAI 兼容接口的默认实现
pub struct HttpLlmClient {
    client: Arc<Client>,
    model: ModelConfig,
    temperature: f32,
    max_tokens: u32,
    /// 工具调用循环的最大轮次
    max_tool_iterations: usize,
}

impl HttpLlmClient {
    pub fn new(client: Arc<Client>, model: ModelConfig) -> Self {
        Self {
            client,
            model,
            temperature: 0.0,
            max_tokens: 2048,
            max_tool_iterations: 4,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n.max(1);
        self
    }

    async fn chat(&self, messages: Vec<Message>, tools: &ToolManager) -> Result<Message> {
        let definitions = tools.to_openai_tools();
        let has_tools = !definitions.is_empty();
        let request_body = ChatCompletionRequest {
            model: self.model.model.clone(),
            messages,
            tools: has_tools.then_some(definitions),
            tool_choice: has_tools.then(|| "auto".to_string()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };
        let header_map = assemble_req_header(&self.model)?;
        let response = post(&self.client, &request_body, header_map, &self.model.baseurl).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::EmptyResponse.into())
    }
}

#[async_trait]
impl ChatBackend for HttpLlmClient {
    async fn complete(&self, messages: Vec<Message>, tools: &ToolManager) -> Result<Message> {
        self.chat(messages, tools).await
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn invoke_with_tools(
        &self,
        system_role: &str,
        messages: Vec<Message>,
        tools: &ToolManager,
    ) -> Result<ReasoningOutput> {
        run_tool_loop(self, system_role, messages, tools, self.max_tool_iterations).await
    }
}

// ── 工具调用循环 ──

/// 单次补全：给定完整对话与可用工具，返回模型的一条回复
#[async_trait]
pub(crate) trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, tools: &ToolManager) -> Result<Message>;
}

/// 反复调用 `backend`，执行模型请求的工具，直到模型给出文本回复。
///
/// - 同一回复中的多个工具调用并发执行，结果按调用顺序回填
/// - [`QaError::Tool`] 以 `Tool error: ...` 文本回传给模型，其余错误直接返回
/// - 超过 `max_iterations` 轮仍在调用工具时返回 [`LlmError::ToolLoopExhausted`]
pub(crate) async fn run_tool_loop(
    backend: &dyn ChatBackend,
    system_role: &str,
    messages: Vec<Message>,
    tools: &ToolManager,
    max_iterations: usize,
) -> Result<ReasoningOutput> {
    let mut conversation = Vec::with_capacity(messages.len() + 1);
    conversation.push(Message::system(system_role.to_string()));
    conversation.extend(messages);
    let mut produced = Vec::new();

    for iteration in 0..max_iterations {
        let reply = backend.complete(conversation.clone(), tools).await?;

        let calls = reply.tool_calls.clone().unwrap_or_default();
        if calls.is_empty() {
            let text = reply.content.clone().ok_or(LlmError::EmptyResponse)?;
            produced.push(reply);
            return Ok(ReasoningOutput {
                text,
                messages: produced,
            });
        }

        debug!(iteration, calls = calls.len(), "🔧 模型请求调用工具");
        conversation.push(reply.clone());
        produced.push(reply);

        // 并发执行，join_all 保持调用顺序
        let results = futures::future::join_all(calls.iter().map(|call| tools.execute_call(call))).await;
        for (call, result) in calls.iter().zip(results) {
            // 参数类错误回传给模型重试；检索服务本身的故障直接上抛
            let content = match result {
                Ok(output) => output,
                Err(QaError::Tool(e)) => {
                    warn!(tool = %call.function.name, error = %e, "工具调用参数有误，错误信息回传给模型");
                    format!("{TOOL_ERROR_PREFIX} {e}")
                }
                Err(e) => return Err(e),
            };
            let msg = Message::tool_result(call.id.clone(), call.function.name.clone(), content);
            conversation.push(msg.clone());
            produced.push(msg);
        }
    }

    Err(LlmError::ToolLoopExhausted(max_iterations).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_tool_result_wins() {
        let output = ReasoningOutput {
            text: "done".to_string(),
            messages: vec![
                Message::tool_result("1".into(), "search_documents".into(), "first".into()),
                Message::assistant("thinking".into()),
                Message::tool_result("2".into(), "search_documents".into(), "second".into()),
                Message::assistant("done".into()),
            ],
        };
        assert_eq!(output.last_tool_result(), Some("second"));
    }

    #[test]
    fn test_no_tool_result() {
        assert_eq!(ReasoningOutput::text("plain").last_tool_result(), None);
    }

    // ── 工具调用循环 ──

    use crate::error::{RetrievalError, ToolError};
    use crate::llm::types::ToolCall;
    use crate::retrieval::Chunk;
    use crate::testing::MockRetriever;
    use crate::tools::retrieval::{RETRIEVAL_TOOL_NAME, RetrievalTool};
    use crate::tools::{Tool, ToolParameters, ToolResult};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 按脚本逐条回复，并记录每次收到的对话
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Message>>,
        /// 脚本耗尽后一直重复的回复
        fallback: Option<Message>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Message>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn repeating(reply: Message) -> Self {
            Self {
                fallback: Some(reply),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, messages: Vec<Message>, _tools: &ToolManager) -> Result<Message> {
            self.requests.lock().unwrap().push(messages);
            let next = self.replies.lock().unwrap().pop_front();
            next.or_else(|| self.fallback.clone())
                .ok_or_else(|| LlmError::EmptyResponse.into())
        }
    }

    /// 休眠 `ms` 毫秒后返回 `label`
    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "sleeps, then echoes the label"
        }

        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn execute(&self, parameters: ToolParameters) -> Result<ToolResult> {
            let ms = parameters.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let label = parameters.get("label").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(ToolResult::success(label.to_string()))
        }
    }

    fn search_call(id: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall::function(id, RETRIEVAL_TOOL_NAME, arguments.to_string())
    }

    fn retrieval_tools(retriever: MockRetriever) -> ToolManager {
        let mut tools = ToolManager::new();
        tools.register(Box::new(RetrievalTool::new(Arc::new(retriever), None, 4)));
        tools
    }

    #[tokio::test]
    async fn test_loop_exhausts_when_model_keeps_calling_tools() {
        let backend = ScriptedBackend::repeating(Message::assistant_with_tools(vec![search_call(
            "c",
            json!({"query": "IVF"}),
        )]));
        let tools = retrieval_tools(MockRetriever::new());

        let err = run_tool_loop(&backend, "role", vec![], &tools, 2).await.unwrap_err();

        assert!(matches!(err, QaError::Llm(LlmError::ToolLoopExhausted(2))));
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_fed_back_to_model() {
        let backend = ScriptedBackend::new(vec![
            Message::assistant_with_tools(vec![
                search_call("c1", json!({})),
                ToolCall::function("c2", "no_such_tool", "{}".to_string()),
            ]),
            Message::assistant("recovered".to_string()),
        ]);
        let tools = retrieval_tools(MockRetriever::new());

        let output = run_tool_loop(&backend, "role", vec![Message::user("q".to_string())], &tools, 4)
            .await
            .unwrap();

        assert_eq!(output.text, "recovered");
        let second = &backend.requests()[1];
        let fed_back: Vec<&str> = second
            .iter()
            .filter(|m| m.is_tool_result())
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert_eq!(fed_back.len(), 2);
        assert_eq!(
            fed_back[0],
            format!("Tool error: {}", ToolError::MissingParameter("query".to_string()))
        );
        assert!(fed_back[1].starts_with("Tool error:"));
        assert!(fed_back[1].contains("no_such_tool"));
        // 输出只包含本轮新产生的消息：一条工具调用、两条结果、一条最终回复
        assert_eq!(output.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates() {
        let backend = ScriptedBackend::new(vec![
            Message::assistant_with_tools(vec![search_call("c1", json!({"query": "IVF"}))]),
            Message::assistant("never reached".to_string()),
        ]);
        let tools = retrieval_tools(MockRetriever::new().with_failure("connection refused"));

        let err = run_tool_loop(&backend, "role", vec![], &tools, 4).await.unwrap_err();

        assert!(matches!(err, QaError::Retrieval(RetrievalError::Unreachable(_))));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_results_keep_call_order() {
        let backend = ScriptedBackend::new(vec![
            Message::assistant_with_tools(vec![
                ToolCall::function("slow", "sleep", json!({"ms": 50, "label": "first"}).to_string()),
                ToolCall::function("fast", "sleep", json!({"ms": 5, "label": "second"}).to_string()),
            ]),
            Message::assistant("done".to_string()),
        ]);
        let mut tools = ToolManager::new();
        tools.register(Box::new(SleepTool));

        let output = run_tool_loop(&backend, "role", vec![], &tools, 4).await.unwrap();

        let results: Vec<(&str, &str)> = output
            .messages
            .iter()
            .filter(|m| m.is_tool_result())
            .map(|m| {
                (
                    m.tool_call_id.as_deref().unwrap_or_default(),
                    m.content.as_deref().unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(results, vec![("slow", "first"), ("fast", "second")]);

        let requests = backend.requests();
        assert_eq!(requests[0][0].role, "system");
        assert_eq!(requests[0][0].content.as_deref(), Some("role"));
        // 第二次请求：system + 工具调用 + 两条结果
        assert_eq!(requests[1].len(), 4);
    }

    #[tokio::test]
    async fn test_search_results_reach_model() {
        let backend = ScriptedBackend::new(vec![
            Message::assistant_with_tools(vec![search_call("c1", json!({"query": "IVF"}))]),
            Message::assistant("answer".to_string()),
        ]);
        let tools = retrieval_tools(MockRetriever::new().with_chunks(vec![Chunk::new("IVF text", 3, 0)]));

        let output = run_tool_loop(&backend, "role", vec![], &tools, 4).await.unwrap();

        assert_eq!(output.last_tool_result(), Some("Chunk 1 (page=3): IVF text"));
    }
}
