use crate::generation::Attachment;
use crate::session::SessionSnapshot;

/// What the input control hands to the controller on submit.
#[derive(Debug)]
pub struct Submission {
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Pending text and file of the input control.
#[derive(Debug, Default)]
pub struct ChatInput {
    text: String,
    attachment: Option<Attachment>,
}

impl ChatInput {
    pub fn is_disabled(&self, snapshot: &SessionSnapshot) -> bool {
        snapshot.is_loading()
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    pub fn attach(&mut self, attachment: Attachment) -> Option<Attachment> {
        self.attachment.replace(attachment)
    }

    pub fn detach(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    pub fn can_submit(&self, snapshot: &SessionSnapshot) -> bool {
        !self.is_disabled(snapshot) && (!self.text.trim().is_empty() || self.attachment.is_some())
    }

    pub fn placeholder(&self, snapshot: &SessionSnapshot) -> &'static str {
        if self.is_disabled(snapshot) {
            "Waiting for the response... (/stop to cancel)"
        } else if self.attachment.is_some() {
            "Add a message with your file..."
        } else {
            "Type a message..."
        }
    }

    /// Takes the pending text and file, leaving the control empty. Returns
    /// `None` and keeps everything when submitting is not allowed.
    pub fn submit(&mut self, snapshot: &SessionSnapshot) -> Option<Submission> {
        if !self.can_submit(snapshot) {
            return None;
        }
        Some(Submission {
            text: std::mem::take(&mut self.text),
            attachment: self.attachment.take(),
        })
    }
}
