//! 四个固定阶段。每个阶段只读状态，返回自己负责的字段。

use crate::compression::turns::append_turn;
use crate::compression::{MemoryCompactor, build_context};
use crate::error::{Result, StateError};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use crate::pipeline::prompts::{
    REFUSAL_ANSWER, RETRIEVAL_SYSTEM_PROMPT, SUMMARIZATION_SYSTEM_PROMPT,
    VERIFICATION_SYSTEM_PROMPT, retrieval_message, summarization_message, verification_message,
};
use crate::pipeline::{Stage, StageName};
use crate::retrieval::Retriever;
use crate::state::{ConversationState, StateUpdate};
use crate::tools::{TOOL_ERROR_PREFIX, ToolManager};
use crate::tools::retrieval::RetrievalTool;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

fn require<'a>(stage: StageName, field: &'static str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| StateError::MissingField { stage, field }.into())
}

// ── Retrieval ─────────────────────────────────────────────────────────────────

pub struct RetrievalStage {
    llm: Arc<dyn LlmClient>,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl RetrievalStage {
    pub fn new(llm: Arc<dyn LlmClient>, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self {
            llm,
            retriever,
            top_k,
        }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn name(&self) -> StageName {
        StageName::Retrieval
    }

    async fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        if state.question.trim().is_empty() {
            return Err(StateError::MissingField {
                stage: self.name(),
                field: "question",
            }
            .into());
        }

        let working_memory = build_context(state);
        let query = retrieval_message(&working_memory, &state.question);

        let mut tools = ToolManager::new();
        tools.register(Box::new(RetrievalTool::new(
            self.retriever.clone(),
            state.scope_id.clone(),
            self.top_k,
        )));

        let output = self
            .llm
            .invoke_with_tools(RETRIEVAL_SYSTEM_PROMPT, vec![Message::user(query)], &tools)
            .await?;

        // 多次检索时以最后一次工具结果为准，不做累积
        let context = match output.last_tool_result() {
            Some(result) if result.starts_with(TOOL_ERROR_PREFIX) => {
                warn!(error = result, "⚠️ 最后一次检索调用失败，工具错误文本将作为 context");
                result.to_string()
            }
            Some(result) => result.to_string(),
            None => {
                warn!("检索阶段模型没有调用检索工具，context 为空");
                String::new()
            }
        };
        debug!(context_len = context.len(), "检索完成");

        Ok(StateUpdate {
            context: Some(context),
            ..Default::default()
        })
    }
}

// ── Summarization ─────────────────────────────────────────────────────────────

pub struct SummarizationStage {
    llm: Arc<dyn LlmClient>,
}

impl SummarizationStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for SummarizationStage {
    fn name(&self) -> StageName {
        StageName::Summarization
    }

    async fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        let context = require(self.name(), "context", state.context.as_deref())?;
        if context.is_empty() {
            warn!("context 为空，草稿答案只能基于空证据生成");
        }

        let message = summarization_message(&build_context(state), &state.question, context);
        let output = self
            .llm
            .invoke(SUMMARIZATION_SYSTEM_PROMPT, vec![Message::user(message)])
            .await?;

        Ok(StateUpdate {
            draft_answer: Some(output.text),
            ..Default::default()
        })
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

pub struct VerificationStage {
    llm: Arc<dyn LlmClient>,
}

impl VerificationStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for VerificationStage {
    fn name(&self) -> StageName {
        StageName::Verification
    }

    async fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        let context = require(self.name(), "context", state.context.as_deref())?;
        let draft_answer = require(self.name(), "draft_answer", state.draft_answer.as_deref())?;

        // 拒答原样保留，不交给模型改写
        let answer = if draft_answer.trim() == REFUSAL_ANSWER {
            debug!("草稿为固定拒答，跳过校验调用");
            REFUSAL_ANSWER.to_string()
        } else {
            let message = verification_message(
                &build_context(state),
                &state.question,
                context,
                draft_answer,
            );
            self.llm
                .invoke(VERIFICATION_SYSTEM_PROMPT, vec![Message::user(message)])
                .await?
                .text
        };

        let history = append_turn(
            state.conversation_history.as_deref(),
            &state.question,
            &answer,
        );

        Ok(StateUpdate {
            answer: Some(answer),
            conversation_history: Some(history),
            ..Default::default()
        })
    }
}

// ── Memory Compaction ─────────────────────────────────────────────────────────

pub struct CompactionStage {
    compactor: MemoryCompactor,
}

impl CompactionStage {
    pub fn new(compactor: MemoryCompactor) -> Self {
        Self { compactor }
    }
}

#[async_trait]
impl Stage for CompactionStage {
    fn name(&self) -> StageName {
        StageName::MemoryCompaction
    }

    async fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        self.compactor.compact(state).await
    }
}
