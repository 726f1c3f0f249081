use crate::session::Message;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

const HISTORY_LABEL: &str = "Previous conversation:";
const MESSAGE_LABEL: &str = "Current message:";

/// Builds the prompt for `text` from the last `limit` messages of `history`,
/// oldest first. Only the message count is bounded, never the length.
pub fn build_prompt(history: &[Message], text: &str, limit: usize) -> String {
    let start = history.len().saturating_sub(limit);

    let mut prompt = String::from(HISTORY_LABEL);
    prompt.push('\n');
    for message in &history[start..] {
        prompt.push_str(&message.text);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(MESSAGE_LABEL);
    prompt.push(' ');
    prompt.push_str(text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConversationId;

    fn history(count: usize) -> Vec<Message> {
        let conversation: ConversationId = "c1".into();
        (0..count)
            .map(|i| {
                let mut message = Message::user(conversation.clone(), &format!("m{}", i), None);
                message.is_bot = i % 2 == 1;
                message
            })
            .collect()
    }

    #[test]
    fn empty_history_has_both_labels() {
        assert_eq!(
            build_prompt(&[], "hello", DEFAULT_HISTORY_LIMIT),
            "Previous conversation:\n\nCurrent message: hello"
        );
    }

    #[test]
    fn short_history_is_kept_in_order() {
        let prompt = build_prompt(&history(3), "next", DEFAULT_HISTORY_LIMIT);
        assert_eq!(
            prompt,
            "Previous conversation:\nm0\nm1\nm2\n\nCurrent message: next"
        );
    }

    #[test]
    fn long_history_keeps_only_the_last_twenty() {
        let prompt = build_prompt(&history(25), "next", DEFAULT_HISTORY_LIMIT);
        let lines: Vec<&str> = prompt.lines().collect();

        assert_eq!(lines[0], "Previous conversation:");
        let kept: Vec<String> = (5..25).map(|i| format!("m{}", i)).collect();
        assert_eq!(&lines[1..21], kept.as_slice());
        assert!(!lines.contains(&"m4"));
        assert!(prompt.ends_with("Current message: next"));
    }

    #[test]
    fn new_text_is_always_last() {
        for count in [0, 1, 19, 20, 21, 40] {
            let prompt = build_prompt(&history(count), "the newest", DEFAULT_HISTORY_LIMIT);
            assert!(prompt.ends_with("Current message: the newest"));
            let included = prompt.lines().filter(|l| l.starts_with('m')).count();
            assert_eq!(included, count.min(DEFAULT_HISTORY_LIMIT));
        }
    }

    #[test]
    fn limit_is_configurable() {
        let prompt = build_prompt(&history(5), "x", 2);
        assert_eq!(prompt, "Previous conversation:\nm3\nm4\n\nCurrent message: x");
    }
}
