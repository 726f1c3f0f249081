use crate::session::{Message, Toast, ToastLevel};
use crate::store::{Conversation, ConversationId};
use crate::utils::truncate_preview;

const SIDEBAR_PREVIEW_CHARS: usize = 40;

pub const LOADING_INDICATOR: &str = "  ...";

/// Renders one transcript entry. `index` is the zero-based position used by
/// `/rm`.
pub fn message(index: usize, message: &Message) -> String {
    let author = if message.is_bot { "bot" } else { "you" };
    let mut out = format!("[{}] {}:", index + 1, author);

    if let Some(attachment) = &message.attachment {
        if attachment.is_image() {
            out.push_str(&format!(" [image: {}]", attachment.file_name()));
        } else {
            out.push_str(&format!(" [Uploaded file: {}]", attachment.file_name()));
        }
    }

    for line in message.text.lines() {
        out.push_str("\n    ");
        out.push_str(line);
    }
    if !message.is_persisted() {
        out.push_str("\n    (not saved)");
    }
    out
}

pub fn sidebar(conversations: &[Conversation], active: Option<&ConversationId>) -> String {
    if conversations.is_empty() {
        return "No conversations yet.".to_string();
    }

    conversations
        .iter()
        .enumerate()
        .map(|(i, conversation)| {
            let marker = if Some(&conversation.id) == active {
                '*'
            } else {
                ' '
            };
            let title = conversation.title.as_deref().unwrap_or("New chat");
            let mut line = format!(
                "{} {:>2}. {}  ({})",
                marker,
                i + 1,
                truncate_preview(title, SIDEBAR_PREVIEW_CHARS),
                conversation.created_at.format("%Y-%m-%d %H:%M"),
            );
            if let Some(preview) = &conversation.last_message {
                line.push_str("\n       ");
                line.push_str(&truncate_preview(preview, SIDEBAR_PREVIEW_CHARS));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn toast(toast: &Toast) -> String {
    let tag = match toast.level {
        ToastLevel::Info => "info",
        ToastLevel::Error => "error",
    };
    format!("[{}] {}: {}", tag, toast.title, toast.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Attachment;
    use crate::store::StoredMessage;
    use chrono::{TimeZone, Utc};

    fn stored(text: &str, is_bot: bool) -> Message {
        Message::from(StoredMessage {
            id: "m1".into(),
            conversation_id: "c1".into(),
            content: text.to_string(),
            is_bot,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn messages_are_numbered_from_one() {
        assert_eq!(message(0, &stored("hello", false)), "[1] you:\n    hello");
        assert_eq!(
            message(1, &stored("hi there\nhow can I help?", true)),
            "[2] bot:\n    hi there\n    how can I help?"
        );
    }

    #[test]
    fn unsaved_message_is_flagged() {
        let message = Message::user("c1".into(), "pending", None);
        assert!(super::message(0, &message).ends_with("(not saved)"));
    }

    #[test]
    fn attachment_preview_depends_on_kind() {
        let image = Attachment::new("cat.png", "image/png", vec![0]);
        let doc = Attachment::new("paper.pdf", "application/pdf", vec![0]);

        let with_image = Message::user("c1".into(), "look", Some(image.reference));
        let with_doc = Message::user("c1".into(), "read", Some(doc.reference));

        assert!(super::message(0, &with_image).contains("[image: cat.png]"));
        assert!(super::message(0, &with_doc).contains("[Uploaded file: paper.pdf]"));
    }

    #[test]
    fn sidebar_marks_active_and_truncates_preview() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let conversations = vec![
            Conversation {
                id: "c2".into(),
                title: None,
                last_message: Some("x".repeat(100)),
                created_at,
            },
            Conversation {
                id: "c1".into(),
                title: Some("hello".into()),
                last_message: Some("hi there".into()),
                created_at,
            },
        ];

        let rendered = sidebar(&conversations, Some(&"c1".into()));
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "   1. New chat  (2024-05-01 09:30)");
        assert!(lines[1].trim().ends_with("..."));
        assert!(lines[1].trim().chars().count() <= SIDEBAR_PREVIEW_CHARS);
        assert!(lines[2].starts_with("*  2. hello"));
        assert_eq!(lines[3].trim(), "hi there");
    }

    #[test]
    fn empty_sidebar() {
        assert_eq!(sidebar(&[], None), "No conversations yet.");
    }

    #[test]
    fn toast_line() {
        assert_eq!(
            toast(&Toast::stopped()),
            "[info] Stopped: Response generation was stopped."
        );
    }
}
