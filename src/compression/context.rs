//! 工作记忆构建（Context Builder）
//!
//! 纯函数：同一状态永远得到同一字符串。优先级：
//!
//! | 摘要 | 历史 | 输出 |
//! |------|------|------|
//! | 有 | 有 | 摘要 + **完整**历史 |
//! | 有 | 无 | 仅摘要 |
//! | 无 | 有 | 原样历史 |
//! | 无 | 无 | 空串 |
//!
//! 空字符串视为缺失。

use crate::state::ConversationState;

pub const SUMMARY_HEADER: &str = "[Previous Context Summary]";
pub const RECENT_HEADER: &str = "[Recent Conversation]";

pub fn build_context(state: &ConversationState) -> String {
    let summary = non_empty(state.conversation_summary.as_deref());
    let history = non_empty(state.conversation_history.as_deref());

    match (summary, history) {
        (Some(summary), Some(history)) => {
            format!("{SUMMARY_HEADER}\n{summary}\n\n{RECENT_HEADER}\n{history}")
        }
        (Some(summary), None) => format!("{SUMMARY_HEADER}\n{summary}"),
        (None, Some(history)) => history.to_string(),
        (None, None) => String::new(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
