//! 历史对话渲染
//!
//! 取会话最近 N 条消息（含当前用户消息），按时间顺序渲染为 `<conversation>` 块作为生成上下文。
//! 每条消息截断到 1000 字符；设置 compression_threshold 时从最旧的消息开始丢弃直到不超限。

use crate::memory::ChatMessage;

/// 单条历史消息最大字符数
pub const HISTORY_TEXT_LIMIT: usize = 1000;

/// 按字符截断，超出时追加 "..."
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// 渲染历史块；messages 为最新在前（与 MessageStore::load_messages 一致）
///
/// 不超过一条消息时返回空串（只有当前消息，没有可回放的历史）。
pub fn render_history(messages_newest_first: &[ChatMessage], max_chars: usize) -> String {
    if messages_newest_first.len() <= 1 {
        return String::new();
    }

    let mut entries: Vec<String> = messages_newest_first
        .iter()
        .rev()
        .map(|m| {
            format!(
                "{}: {}\n\n",
                m.message_type,
                truncate_chars(&m.message, HISTORY_TEXT_LIMIT)
            )
        })
        .collect();

    if max_chars > 0 {
        let mut total: usize = entries.iter().map(|e| e.chars().count()).sum();
        while total > max_chars && entries.len() > 1 {
            total -= entries.remove(0).chars().count();
        }
    }

    format!("<conversation>\n{}</conversation>", entries.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChatMessage;

    fn newest_first(texts: &[&str]) -> Vec<ChatMessage> {
        let mut msgs: Vec<ChatMessage> = texts.iter().map(|t| ChatMessage::user("s1", *t)).collect();
        msgs.reverse();
        msgs
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
    }

    #[test]
    fn test_single_message_has_no_history() {
        assert_eq!(render_history(&newest_first(&["only"]), 0), "");
        assert_eq!(render_history(&[], 0), "");
    }

    #[test]
    fn test_renders_chronologically() {
        let block = render_history(&newest_first(&["first", "second"]), 0);
        assert_eq!(block, "<conversation>\nuser: first\n\nuser: second\n\n</conversation>");
    }

    #[test]
    fn test_threshold_drops_oldest() {
        let block = render_history(&newest_first(&["aaaaaaaaaa", "bbbbbbbbbb", "c"]), 12);
        assert!(!block.contains("aaaa"));
        assert!(!block.contains("bbbb"));
        assert!(block.contains("user: c"));
    }

    #[test]
    fn test_long_message_truncated() {
        let long = "x".repeat(HISTORY_TEXT_LIMIT + 10);
        let block = render_history(&newest_first(&["q", &long]), 0);
        assert!(block.contains(&format!("{}...", "x".repeat(HISTORY_TEXT_LIMIT))));
    }
}
