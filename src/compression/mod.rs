//! 会话记忆管理
//!
//! | 组件 | 作用 |
//! |------|------|
//! | [`turns`] | 历史字符串的轮次解析与追加 |
//! | [`build_context`] | 由摘要 + 历史构造每个阶段看到的工作记忆 |
//! | [`MemoryCompactor`] | 超过阈值时把旧轮次并入摘要，保证信息不丢失 |
//!
//! 压缩发生在流水线最后一个阶段；同一轮内下游读到的工作记忆始终是
//! “摘要 + 保留的历史”，对调用方透明。

pub mod compactor;
pub mod context;
pub mod turns;

pub use compactor::{
    CompactionConfig, CompactionPlan, DefaultSummaryPrompt, FnSummaryPrompt, MemoryCompactor,
    SummaryPromptBuilder,
};
pub use context::build_context;
