//! 历史记录的轮次解析
//!
//! 历史是一段字符串，每轮形如：
//! ```text
//! User: <question>
//! Assistant: <answer>
//! ```
//! 轮次之间以空行分隔。轮次边界只认行首、大小写精确的 `User:` 后跟空白字符。
//!
//! 注意：答案正文里若有以 `User: ` 开头的行，会被误计为新的一轮。

use regex::Regex;
use std::sync::LazyLock;

pub const USER_PREFIX: &str = "User:";
pub const ASSISTANT_PREFIX: &str = "Assistant:";

static USER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^User:\s").expect("user marker pattern is valid"));

/// 单轮的标准文本形式
pub fn format_turn(question: &str, answer: &str) -> String {
    format!("{USER_PREFIX} {question}\n{ASSISTANT_PREFIX} {answer}")
}

/// 把新一轮追加到已有历史之后
pub fn append_turn(history: Option<&str>, question: &str, answer: &str) -> String {
    let turn = format_turn(question, answer);
    match history {
        Some(existing) if !existing.is_empty() => format!("{existing}\n\n{turn}"),
        _ => turn,
    }
}

/// 按 `User:` 标记切分后的非空片段数
pub fn count_turns(history: &str) -> usize {
    USER_MARKER
        .split(history)
        .filter(|segment| !segment.trim().is_empty())
        .count()
}

/// 每个 `User:` 标记的起始字节偏移
pub fn turn_offsets(history: &str) -> Vec<usize> {
    USER_MARKER.find_iter(history).map(|m| m.start()).collect()
}

/// 在倒数第 `keep_recent` 个标记处切分，返回 `(older, recent)`。
///
/// `older` 去掉首尾空白；标记不足 `keep_recent` 个时 `older` 为空、整段历史都算 recent。
pub fn split_recent(history: &str, keep_recent: usize) -> (&str, &str) {
    if keep_recent == 0 {
        return (history.trim(), "");
    }
    let offsets = turn_offsets(history);
    if offsets.len() < keep_recent {
        return ("", history);
    }
    let at = offsets[offsets.len() - keep_recent];
    (history[..at].trim(), &history[at..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(n: usize) -> String {
        let mut history: Option<String> = None;
        for i in 1..=n {
            history = Some(append_turn(
                history.as_deref(),
                &format!("question {i}"),
                &format!("answer {i}"),
            ));
        }
        history.unwrap_or_default()
    }

    #[test]
    fn test_append_first_turn() {
        assert_eq!(
            append_turn(None, "What is HNSW?", "A graph index."),
            "User: What is HNSW?\nAssistant: A graph index."
        );
        assert_eq!(append_turn(Some(""), "q", "a"), "User: q\nAssistant: a");
    }

    #[test]
    fn test_append_separates_turns() {
        let history = append_turn(Some("User: q1\nAssistant: a1"), "q2", "a2");
        assert_eq!(history, "User: q1\nAssistant: a1\n\nUser: q2\nAssistant: a2");
    }

    #[test]
    fn test_count_turns() {
        assert_eq!(count_turns(""), 0);
        assert_eq!(count_turns(&history_of(1)), 1);
        assert_eq!(count_turns(&history_of(6)), 6);
    }

    #[test]
    fn test_marker_is_line_anchored_and_case_exact() {
        let history = "User: q1\nAssistant: said User: inline\n\nuser: lowercase\nAssistant: x";
        assert_eq!(turn_offsets(history), vec![0]);
        assert_eq!(count_turns(history), 1);
    }

    #[test]
    fn test_split_recent_keeps_last_three() {
        let history = history_of(6);
        let (older, recent) = split_recent(&history, 3);

        assert!(older.starts_with("User: question 1"));
        assert!(older.ends_with("answer 3"));
        assert!(recent.starts_with("User: question 4"));
        assert_eq!(count_turns(recent), 3);
        assert_eq!(count_turns(older), 3);
    }

    #[test]
    fn test_split_recent_window_covers_everything() {
        let history = history_of(2);
        let (older, recent) = split_recent(&history, 3);
        assert!(older.is_empty());
        assert_eq!(recent, history);

        // 恰好等于窗口时切点落在第一个标记上，older 同样为空
        let history = history_of(3);
        let (older, recent) = split_recent(&history, 3);
        assert!(older.is_empty());
        assert_eq!(recent, history);
    }
}
