//! 问答流水线编排
//!
//! 固定的直线状态机：
//!
//! ```text
//! Retrieval ─► Summarization ─► Verification ─► MemoryCompaction ─► done
//! ```
//!
//! 每个阶段读取当前状态、返回部分更新，编排器浅合并后交给下一阶段。
//! 任一阶段失败立即中止本轮，错误带上失败阶段名，编排器本身不重试也不持久化。

pub mod prompts;
pub mod stages;

use crate::compression::{CompactionConfig, MemoryCompactor};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::retrieval::Retriever;
use crate::state::{ConversationState, StateUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stages::{CompactionStage, RetrievalStage, SummarizationStage, VerificationStage};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span};

/// 阶段名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Retrieval,
    Summarization,
    Verification,
    MemoryCompaction,
}

impl StageName {
    /// 执行顺序
    pub const ORDER: [StageName; 4] = [
        StageName::Retrieval,
        StageName::Summarization,
        StageName::Verification,
        StageName::MemoryCompaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Retrieval => "retrieval",
            StageName::Summarization => "summarization",
            StageName::Verification => "verification",
            StageName::MemoryCompaction => "memory_compaction",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个阶段：`(state) -> partial_update`
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;
    async fn run(&self, state: &ConversationState) -> Result<StateUpdate>;
}

/// 流水线参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 每次检索返回的片段数
    pub top_k: usize,
    pub compaction: CompactionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            compaction: CompactionConfig::default(),
        }
    }
}

/// 问答流水线。进程启动时构建一次，多个会话线程可共享同一实例。
pub struct QaPipeline {
    stages: [Box<dyn Stage>; 4],
}

impl QaPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, retriever: Arc<dyn Retriever>, config: PipelineConfig) -> Self {
        Self {
            stages: [
                Box::new(RetrievalStage::new(llm.clone(), retriever, config.top_k)),
                Box::new(SummarizationStage::new(llm.clone())),
                Box::new(VerificationStage::new(llm.clone())),
                Box::new(CompactionStage::new(MemoryCompactor::new(llm, config.compaction))),
            ],
        }
    }

    pub fn stage_order(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 按固定顺序执行全部阶段，返回最终状态。
    ///
    /// 失败时返回 [`QaError::Stage`](crate::error::QaError::Stage)，已合并的中间状态随之丢弃。
    pub async fn run(&self, initial: ConversationState, thread_id: &str) -> Result<ConversationState> {
        let span = info_span!("qa_pipeline", thread_id = %thread_id);
        async move {
            let started = Instant::now();
            let mut state = initial;

            for stage in &self.stages {
                let name = stage.name();
                let stage_started = Instant::now();
                let update = stage.run(&state).await.map_err(|e| e.in_stage(name))?;
                debug!(
                    stage = %name,
                    fields = ?update.touched_fields(),
                    elapsed_ms = stage_started.elapsed().as_millis() as u64,
                    "阶段完成"
                );
                state.apply(update);
            }

            info!(elapsed_ms = started.elapsed().as_millis() as u64, "✅ 流水线执行完成");
            Ok(state)
        }
        .instrument(span)
        .await
    }
}
