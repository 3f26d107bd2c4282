//! 会话状态
//!
//! [`ConversationState`] 在一次流水线执行中由编排器独占，各阶段只读状态并返回
//! [`StateUpdate`]（部分更新）。合并规则是浅覆盖：更新中为 `None` 的字段保持原值。

use serde::{Deserialize, Serialize};

/// 流水线中传递、在两轮之间由 Checkpointer 持久化的状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// 本轮问题，执行期间不可变
    pub question: String,
    /// 检索到的证据，仅由检索阶段写入
    #[serde(default)]
    pub context: Option<String>,
    /// 草稿答案，仅由摘要阶段写入
    #[serde(default)]
    pub draft_answer: Option<String>,
    /// 对外可见的最终答案，仅由校验阶段写入
    #[serde(default)]
    pub answer: Option<String>,
    /// `User:` / `Assistant:` 交替的历史记录，只追加
    #[serde(default)]
    pub conversation_history: Option<String>,
    /// 超出保留窗口的旧轮次的压缩摘要
    #[serde(default)]
    pub conversation_summary: Option<String>,
    /// 限定检索范围的文档 / 语料标识
    #[serde(default)]
    pub scope_id: Option<String>,
}

impl ConversationState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// 基于上一轮快照构造新一轮的初始状态。
    ///
    /// 记忆字段（历史、摘要）沿用快照；本轮产物（context / draft / answer）清空，
    /// 保证下游阶段读到的一定是本轮写入的值。
    pub fn seeded(prior: Option<ConversationState>, question: impl Into<String>, scope_id: Option<String>) -> Self {
        let prior = prior.unwrap_or_default();
        Self {
            question: question.into(),
            context: None,
            draft_answer: None,
            answer: None,
            conversation_history: prior.conversation_history,
            conversation_summary: prior.conversation_summary,
            scope_id,
        }
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.conversation_history = Some(history.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.conversation_summary = Some(summary.into());
        self
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    /// 浅合并部分更新
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            context,
            draft_answer,
            answer,
            conversation_history,
            conversation_summary,
        } = update;

        if context.is_some() {
            self.context = context;
        }
        if draft_answer.is_some() {
            self.draft_answer = draft_answer;
        }
        if answer.is_some() {
            self.answer = answer;
        }
        if conversation_history.is_some() {
            self.conversation_history = conversation_history;
        }
        if conversation_summary.is_some() {
            self.conversation_summary = conversation_summary;
        }
    }
}

/// 阶段返回的部分更新；`question` 和 `scope_id` 不可被阶段修改，因此不在其中
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub context: Option<String>,
    pub draft_answer: Option<String>,
    pub answer: Option<String>,
    pub conversation_history: Option<String>,
    pub conversation_summary: Option<String>,
}

impl StateUpdate {
    /// 空更新：合并后状态不变
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 本次更新写入的字段名，用于日志
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.context.is_some() {
            fields.push("context");
        }
        if self.draft_answer.is_some() {
            fields.push("draft_answer");
        }
        if self.answer.is_some() {
            fields.push("answer");
        }
        if self.conversation_history.is_some() {
            fields.push("conversation_history");
        }
        if self.conversation_summary.is_some() {
            fields.push("conversation_summary");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_partial() {
        let mut state = ConversationState::new("q")
            .with_history("User: a\nAssistant: b")
            .with_scope("doc-1");
        state.apply(StateUpdate {
            context: Some("ctx".into()),
            ..Default::default()
        });

        assert_eq!(state.context.as_deref(), Some("ctx"));
        assert_eq!(state.conversation_history.as_deref(), Some("User: a\nAssistant: b"));
        assert_eq!(state.scope_id.as_deref(), Some("doc-1"));
        assert_eq!(state.question, "q");
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut state = ConversationState::new("q").with_summary("s");
        let before = state.clone();
        state.apply(StateUpdate::none());
        assert_eq!(state, before);
        assert!(StateUpdate::none().is_empty());
    }

    #[test]
    fn test_seeded_keeps_memory_only() {
        let prior = ConversationState {
            question: "old".into(),
            context: Some("old ctx".into()),
            draft_answer: Some("old draft".into()),
            answer: Some("old answer".into()),
            conversation_history: Some("User: old\nAssistant: old answer".into()),
            conversation_summary: Some("summary".into()),
            scope_id: Some("doc-1".into()),
        };
        let state = ConversationState::seeded(Some(prior), "new", Some("doc-2".into()));

        assert_eq!(state.question, "new");
        assert!(state.context.is_none());
        assert!(state.draft_answer.is_none());
        assert!(state.answer.is_none());
        assert_eq!(state.conversation_summary.as_deref(), Some("summary"));
        assert_eq!(state.scope_id.as_deref(), Some("doc-2"));
    }

    #[test]
    fn test_touched_fields() {
        let update = StateUpdate {
            answer: Some("a".into()),
            conversation_history: Some("h".into()),
            ..Default::default()
        };
        assert_eq!(update.touched_fields(), vec!["answer", "conversation_history"]);
    }
}
