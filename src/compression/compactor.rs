use crate::compression::turns::{count_turns, split_recent};
use crate::error::{LlmError, Result};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use crate::state::{ConversationState, StateUpdate};
use std::sync::Arc;
use tracing::{debug, info};

pub const MEMORY_SUMMARY_SYSTEM_PROMPT: &str = "You are a Memory Summarization Agent.
Your job is to compress long conversation histories into concise summaries to
optimize token usage while preserving key information.

Instructions:
- Analyze the conversation history provided.
- Identify main topics discussed, key questions asked, and important answers given.
- Create a concise summary that captures the essence of the conversation.
- Include key technical terms, concepts, and relationships discussed.
- Focus on information that might be relevant for future questions in this conversation.
- If a previous summary is provided, merge it with the additional history; never drop facts it contains.
- Keep the summary brief (2-5 sentences) while preserving critical context.
";

/// 压缩触发条件与保留窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionConfig {
    /// 轮数超过该值才压缩
    pub threshold: usize,
    /// 压缩后原样保留的最近轮数
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            keep_recent: 3,
        }
    }
}

/// 摘要提示词构建接口
pub trait SummaryPromptBuilder: Send + Sync {
    fn build(&self, previous_summary: Option<&str>, older_history: &str) -> String;
}

/// 默认提示词：旧摘要（若有）+ 待压缩的历史
pub struct DefaultSummaryPrompt;

impl SummaryPromptBuilder for DefaultSummaryPrompt {
    fn build(&self, previous_summary: Option<&str>, older_history: &str) -> String {
        let content = match previous_summary.filter(|s| !s.is_empty()) {
            Some(summary) => {
                format!("Previous Summary:\n{summary}\n\nAdditional History:\n{older_history}")
            }
            None => older_history.to_string(),
        };
        format!(
            "Summarize the following conversation history concisely:\n\n{content}\n\n\
             Provide a brief summary (2-5 sentences) highlighting key topics, questions, \
             and important information discussed."
        )
    }
}

/// 用闭包自定义提示词的便捷包装
pub struct FnSummaryPrompt<F>(pub F)
where
    F: Fn(Option<&str>, &str) -> String + Send + Sync;

impl<F> SummaryPromptBuilder for FnSummaryPrompt<F>
where
    F: Fn(Option<&str>, &str) -> String + Send + Sync,
{
    fn build(&self, previous_summary: Option<&str>, older_history: &str) -> String {
        (self.0)(previous_summary, older_history)
    }
}

/// 一次压缩的切分方案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan<'a> {
    pub turns: usize,
    /// 将被并入摘要的旧轮次
    pub older: &'a str,
    /// 原样保留的最近轮次
    pub recent: &'a str,
}

/// 记忆压缩：轮数超过阈值时，把保留窗口之外的旧轮次并入摘要。
///
/// 旧轮次只有在新摘要生成成功之后才会从历史中移除；
/// 摘要调用失败或返回空文本时整个阶段失败，状态保持不变。
pub struct MemoryCompactor<P: SummaryPromptBuilder = DefaultSummaryPrompt> {
    llm: Arc<dyn LlmClient>,
    prompt_builder: P,
    config: CompactionConfig,
}

impl MemoryCompactor<DefaultSummaryPrompt> {
    pub fn new(llm: Arc<dyn LlmClient>, config: CompactionConfig) -> Self {
        Self::with_prompt(llm, DefaultSummaryPrompt, config)
    }
}

impl<P: SummaryPromptBuilder> MemoryCompactor<P> {
    pub fn with_prompt(llm: Arc<dyn LlmClient>, prompt_builder: P, config: CompactionConfig) -> Self {
        Self {
            llm,
            prompt_builder,
            config,
        }
    }

    pub fn config(&self) -> CompactionConfig {
        self.config
    }

    /// 纯计算：是否需要压缩以及切分位置。`None` 表示本轮不压缩。
    pub fn plan<'a>(&self, history: &'a str) -> Option<CompactionPlan<'a>> {
        let turns = count_turns(history);
        if turns <= self.config.threshold {
            debug!(turns, threshold = self.config.threshold, "历史未超过阈值，无需压缩");
            return None;
        }
        let (older, recent) = split_recent(history, self.config.keep_recent);
        if older.is_empty() {
            debug!(turns, "没有可压缩的旧轮次");
            return None;
        }
        Some(CompactionPlan {
            turns,
            older,
            recent,
        })
    }

    /// 对状态执行压缩，返回 `{conversation_summary, conversation_history}` 或空更新
    pub async fn compact(&self, state: &ConversationState) -> Result<StateUpdate> {
        let Some(history) = state.conversation_history.as_deref().filter(|h| !h.is_empty()) else {
            return Ok(StateUpdate::none());
        };
        let Some(plan) = self.plan(history) else {
            return Ok(StateUpdate::none());
        };

        info!(
            turns = plan.turns,
            keep_recent = self.config.keep_recent,
            "🗜️ 历史超过阈值，开始生成摘要"
        );

        let prompt = self
            .prompt_builder
            .build(state.conversation_summary.as_deref(), plan.older);
        let output = self
            .llm
            .invoke(MEMORY_SUMMARY_SYSTEM_PROMPT, vec![Message::user(prompt)])
            .await?;

        let summary = output.text.trim();
        if summary.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }

        debug!(summary_len = summary.len(), "摘要生成完成");
        Ok(StateUpdate {
            conversation_summary: Some(summary.to_string()),
            conversation_history: Some(plan.recent.to_string()),
            ..Default::default()
        })
    }
}
