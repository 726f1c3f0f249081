//! Line-oriented terminal front end.
//!
//! Reacts to session snapshots and toasts; every user action is forwarded to
//! the [`SessionController`]. Errors from the controller are already turned
//! into toasts there, so this layer only logs them.

mod command;
mod input;
mod render;

pub use command::Command;
pub use input::{ChatInput, Submission};

use crate::generation::Attachment;
use crate::session::{SessionController, SessionSnapshot, Toasts};
use crate::store::{Conversation, ConversationId};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub struct Terminal {
    controller: Arc<SessionController>,
    toasts: Toasts,
    input: ChatInput,
    /// Result of the last `/list`, which `/open` and `/delete` index into.
    conversations: Vec<Conversation>,
    shown_conversation: Option<ConversationId>,
    shown_messages: usize,
    was_loading: bool,
}

impl Terminal {
    pub fn new(controller: Arc<SessionController>, toasts: Toasts) -> Self {
        Self {
            controller,
            toasts,
            input: ChatInput::default(),
            conversations: Vec::new(),
            shown_conversation: None,
            shown_messages: 0,
            was_loading: false,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut snapshots = self.controller.subscribe();

        println!("Type a message to chat, /help for commands.");
        let initial = snapshots.borrow_and_update().clone();
        self.show(&initial);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Input closed");
                        break;
                    };
                    if !self.handle_line(&line).await {
                        break;
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.show(&snapshot);
                }
                _ = self.toasts.wait() => {
                    for toast in self.toasts.drain() {
                        println!("{}", render::toast(&toast));
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    // First interrupt stops a running request, a second one exits.
                    if !self.controller.stop_generation().await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        let command = match command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };

        match command {
            Command::Send(text) => self.submit(&text),
            Command::Attach(path) => match Attachment::from_path(&path).await {
                Ok(attachment) => {
                    println!("Attached {}", attachment.filename);
                    if let Some(previous) = self.input.attach(attachment) {
                        println!("(replaces {})", previous.filename);
                    }
                }
                Err(e) => println!("{}", e),
            },
            Command::Detach => match self.input.detach() {
                Some(attachment) => println!("Removed {}", attachment.filename),
                None => println!("Nothing attached."),
            },
            Command::New => {
                if let Err(e) = self.controller.new_conversation().await {
                    debug!("New conversation failed: {}", e);
                }
            }
            Command::List => self.list().await,
            Command::Open(index) => match self.conversations.get(index) {
                Some(conversation) => {
                    let id = conversation.id.clone();
                    if let Err(e) = self.controller.select_conversation(&id).await {
                        debug!("Selecting {} failed: {}", id, e);
                    }
                }
                None => println!("No conversation {}. Use /list first.", index + 1),
            },
            Command::Delete(index) => match self.conversations.get(index) {
                Some(conversation) => {
                    let id = conversation.id.clone();
                    match self.controller.delete_conversation(&id).await {
                        Ok(()) => self.list().await,
                        Err(e) => debug!("Deleting {} failed: {}", id, e),
                    }
                }
                None => println!("No conversation {}. Use /list first.", index + 1),
            },
            Command::Rm(index) => {
                let snapshot = self.controller.snapshot();
                match snapshot.messages.get(index) {
                    Some(message) => {
                        if let Err(e) = self.controller.delete_message(message.local_id).await {
                            debug!("Deleting message {} failed: {}", message.local_id, e);
                        }
                    }
                    None => println!("No message {}.", index + 1),
                }
            }
            Command::Stop => {
                if !self.controller.stop_generation().await {
                    println!("Nothing to stop.");
                }
            }
            Command::Help => println!("{}", command::HELP),
            Command::Quit => return false,
        }
        true
    }

    fn submit(&mut self, text: &str) {
        let snapshot = self.controller.snapshot();
        self.input.set_text(text);

        let Some(Submission { text, attachment }) = self.input.submit(&snapshot) else {
            if self.input.is_disabled(&snapshot) {
                println!("{}", self.input.placeholder(&snapshot));
            }
            return;
        };

        let controller = self.controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.send_message(&text, attachment).await {
                debug!("Send failed: {}", e);
            }
        });
    }

    async fn list(&mut self) {
        match self.controller.list_conversations().await {
            Ok(conversations) => {
                let active = self.controller.snapshot().conversation_id;
                println!("{}", render::sidebar(&conversations, active.as_ref()));
                self.conversations = conversations;
            }
            Err(e) => debug!("Listing conversations failed: {}", e),
        }
    }

    /// Prints what changed since the last snapshot. While a request is
    /// pending, messages are printed only once saved, so the transcript
    /// numbering matches what `/rm` will act on.
    fn show(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.conversation_id != self.shown_conversation
            || snapshot.messages.len() < self.shown_messages
        {
            if let Some(id) = &snapshot.conversation_id {
                println!("--- conversation {} ---", id);
            }
            self.shown_conversation = snapshot.conversation_id.clone();
            self.shown_messages = 0;
        }

        let ready = if snapshot.is_loading() {
            snapshot
                .messages
                .iter()
                .take_while(|m| m.is_persisted())
                .count()
        } else {
            snapshot.messages.len()
        };
        for (i, message) in snapshot
            .messages
            .iter()
            .enumerate()
            .take(ready)
            .skip(self.shown_messages)
        {
            println!("{}", render::message(i, message));
        }
        self.shown_messages = self.shown_messages.max(ready);

        let loading = snapshot.is_loading();
        if loading && !self.was_loading {
            println!("{}", render::LOADING_INDICATOR);
        }
        self.was_loading = loading;
    }
}
