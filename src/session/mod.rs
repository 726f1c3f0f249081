//! Conversation session controller.
//!
//! Owns the in-memory view of the active conversation and mediates between
//! front-end actions, the [`Generator`] and the [`ConversationStore`]. State
//! changes are published as whole [`SessionSnapshot`]s, so a subscriber never
//! observes a half-applied update.

mod error;
mod message;
mod toast;

pub use error::SessionError;
pub use message::{LocalId, Message};
pub use toast::{Toast, ToastLevel, Toasts};

use crate::context::build_prompt;
use crate::generation::{Attachment, AttachmentRef, Generator};
use crate::store::{
    Conversation, ConversationId, ConversationPatch, ConversationStore, NewMessage, StoreError,
    StoredMessage,
};
use crate::utils::truncate_preview;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// No conversation was active; one is being created for the pending send.
    AwaitingConversation,
    Generating,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub phase: Phase,
}

impl SessionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.phase != Phase::Idle
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Replied(Message),
    Stopped,
}

struct InFlight {
    request_id: u64,
    conversation_id: ConversationId,
    cancel: CancellationToken,
}

/// A send that may still write to the store, stopped or not.
#[derive(Debug, Clone)]
struct PendingSend {
    request_id: u64,
    conversation_id: ConversationId,
}

/// Unregisters its send on drop, whichever way `send_message` returns.
struct PendingGuard<'a> {
    sends: &'a watch::Sender<Vec<PendingSend>>,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let request_id = self.request_id;
        self.sends
            .send_modify(|sends| sends.retain(|s| s.request_id != request_id));
    }
}

// `in_flight` is Some exactly while `phase == Generating`.
#[derive(Default)]
struct SessionState {
    conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    phase: Phase,
    in_flight: Option<InFlight>,
    selection: u64,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: self.messages.clone(),
            phase: self.phase,
        }
    }

    fn activate(&mut self, id: ConversationId, messages: Vec<Message>) {
        self.selection += 1;
        self.conversation_id = Some(id);
        self.messages = messages;
    }

    fn begin_generation(
        &mut self,
        message: Message,
        request_id: u64,
        cancel: &CancellationToken,
        history_limit: usize,
    ) -> String {
        let prompt = build_prompt(&self.messages, &message.text, history_limit);
        let conversation_id = message.conversation_id.clone();
        self.messages.push(message);
        self.phase = Phase::Generating;
        self.in_flight = Some(InFlight {
            request_id,
            conversation_id,
            cancel: cancel.clone(),
        });
        prompt
    }

    /// Returns to `Idle` if `request_id` is still the request in flight.
    fn finish_generation(&mut self, request_id: u64) -> bool {
        match &self.in_flight {
            Some(in_flight) if in_flight.request_id == request_id => {
                self.in_flight = None;
                self.phase = Phase::Idle;
                true
            }
            _ => false,
        }
    }
}

pub struct SessionController {
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn Generator>,
    toasts: Toasts,
    history_limit: usize,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
    sends: watch::Sender<Vec<PendingSend>>,
    next_request: AtomicU64,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn Generator>,
        toasts: Toasts,
        history_limit: usize,
    ) -> Arc<Self> {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (sends, _) = watch::channel(Vec::new());
        Arc::new(Self {
            store,
            generator,
            toasts,
            history_limit,
            state: Mutex::new(SessionState::default()),
            snapshots,
            sends,
            next_request: AtomicU64::new(1),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }

    fn track(&self, request_id: u64, conversation_id: &ConversationId) -> PendingGuard<'_> {
        self.sends.send_modify(|sends| {
            sends.push(PendingSend {
                request_id,
                conversation_id: conversation_id.clone(),
            })
        });
        PendingGuard {
            sends: &self.sends,
            request_id,
        }
    }

    /// Resolves once no send is left that could still write to `conversation_id`.
    async fn wait_for_sends(&self, conversation_id: &ConversationId) {
        let mut sends = self.sends.subscribe();
        let settled = sends
            .wait_for(|sends| sends.iter().all(|s| &s.conversation_id != conversation_id))
            .await
            .is_ok();
        if !settled {
            warn!("Stopped waiting for sends to conversation {}", conversation_id);
        }
    }

    fn fail(&self, error: SessionError) -> SessionError {
        match &error {
            SessionError::Busy => warn!("Rejected action: {}", error),
            _ => error!("Session error: {}", error),
        }
        self.toasts.push(Toast::from_error(&error));
        error
    }

    /// Restores the most recent conversation, if any.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let conversations = self.list_conversations().await?;
        match conversations.first() {
            Some(latest) => self.select_conversation(&latest.id).await,
            None => {
                info!("No saved conversations");
                Ok(())
            }
        }
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        self.store
            .list_conversations()
            .await
            .map_err(|e| self.fail(e.into()))
    }

    pub async fn select_conversation(&self, id: &ConversationId) -> Result<(), SessionError> {
        let selection = {
            let mut state = self.state.lock().await;
            state.selection += 1;
            state.selection
        };

        let stored = self
            .store
            .list_messages(id)
            .await
            .map_err(|e| self.fail(e.into()))?;
        let messages: Vec<Message> = stored.into_iter().map(Message::from).collect();

        let mut state = self.state.lock().await;
        if state.selection != selection {
            debug!("Discarding superseded fetch of conversation {}", id);
            return Ok(());
        }
        info!("Selected conversation {} ({} messages)", id, messages.len());
        state.activate(id.clone(), messages);
        self.publish(&state);
        Ok(())
    }

    pub async fn new_conversation(&self) -> Result<Conversation, SessionError> {
        self.open_conversation(None)
            .await
            .map_err(|e| self.fail(e.into()))
    }

    async fn open_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError> {
        let conversation = self.store.create_conversation(title).await?;

        let mut state = self.state.lock().await;
        state.activate(conversation.id.clone(), Vec::new());
        self.publish(&state);
        Ok(conversation)
    }

    pub async fn send_message(
        &self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<SendOutcome, SessionError> {
        let attachment_ref: Option<AttachmentRef> =
            attachment.as_ref().map(|a| a.reference.clone());
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let begun = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Idle {
                return Err(self.fail(SessionError::Busy));
            }
            match state.conversation_id.clone() {
                Some(id) => {
                    let message = Message::user(id.clone(), text, attachment_ref.clone());
                    let local_id = message.local_id;
                    let prompt =
                        state.begin_generation(message, request_id, &cancel, self.history_limit);
                    self.publish(&state);
                    let pending = self.track(request_id, &id);
                    Some((id, local_id, prompt, pending))
                }
                None => {
                    state.phase = Phase::AwaitingConversation;
                    self.publish(&state);
                    None
                }
            }
        };

        let (conversation_id, local_id, prompt, _pending) = match begun {
            Some(begun) => begun,
            None => {
                let title = conversation_title(text, attachment.as_ref());
                let conversation = match self.open_conversation(title.as_deref()).await {
                    Ok(conversation) => conversation,
                    Err(e) => {
                        let mut state = self.state.lock().await;
                        state.phase = Phase::Idle;
                        self.publish(&state);
                        return Err(self.fail(e.into()));
                    }
                };

                let message = Message::user(conversation.id.clone(), text, attachment_ref);
                let local_id = message.local_id;
                let mut state = self.state.lock().await;
                let prompt =
                    state.begin_generation(message, request_id, &cancel, self.history_limit);
                self.publish(&state);
                let pending = self.track(request_id, &conversation.id);
                (conversation.id, local_id, prompt, pending)
            }
        };

        // A failed save leaves the optimistic message in place without a durable id.
        match self.persist_message(&conversation_id, text).await {
            Ok(stored) => self.reconcile(local_id, &stored).await,
            Err(e) => {
                self.finish(request_id).await;
                return Err(self.fail(e.into()));
            }
        }
        if cancel.is_cancelled() {
            info!("Request {} was stopped before generation started", request_id);
            self.finish(request_id).await;
            return Ok(SendOutcome::Stopped);
        }

        let reply = match self
            .generator
            .generate(&prompt, attachment.as_ref(), &cancel)
            .await
        {
            Ok(_) if cancel.is_cancelled() => {
                info!("Discarding reply that arrived after the request was stopped");
                self.finish(request_id).await;
                return Ok(SendOutcome::Stopped);
            }
            Ok(reply) => reply,
            Err(e) if e.is_cancelled() => {
                self.finish(request_id).await;
                return Ok(SendOutcome::Stopped);
            }
            Err(e) => {
                // The user message stays saved; the conversation is left unanswered.
                self.finish(request_id).await;
                return Err(self.fail(e.into()));
            }
        };

        let stored = match self.insert_message(&conversation_id, &reply, true).await {
            Ok(stored) => stored,
            Err(e) => {
                self.finish(request_id).await;
                return Err(self.fail(e.into()));
            }
        };

        let mut state = self.state.lock().await;
        // Stopped while the reply was being saved: it must not follow later messages.
        if !state.finish_generation(request_id) {
            drop(state);
            info!("Discarding reply {} saved after the request was stopped", stored.id);
            if let Err(e) = self.store.delete_message(&stored.id).await {
                warn!("Failed to remove discarded reply {}: {}", stored.id, e);
            }
            return Ok(SendOutcome::Stopped);
        }
        let message = Message::from(stored);
        if state.conversation_id.as_ref() == Some(&conversation_id) {
            state.messages.push(message.clone());
        }
        self.publish(&state);
        drop(state);

        self.update_preview(&conversation_id, &reply).await;
        Ok(SendOutcome::Replied(message))
    }

    /// User message insert followed by a preview update. The two calls are not atomic; a
    /// failed preview update only leaves the sidebar stale.
    async fn persist_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<StoredMessage, StoreError> {
        let stored = self.insert_message(conversation_id, text, false).await?;
        self.update_preview(conversation_id, text).await;
        Ok(stored)
    }

    async fn insert_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        is_bot: bool,
    ) -> Result<StoredMessage, StoreError> {
        self.store
            .insert_message(NewMessage {
                conversation_id: conversation_id.clone(),
                content: text.to_string(),
                is_bot,
            })
            .await
    }

    async fn update_preview(&self, conversation_id: &ConversationId, text: &str) {
        if let Err(e) = self
            .store
            .update_conversation(conversation_id, ConversationPatch::last_message(text))
            .await
        {
            warn!(
                "Failed to update preview of conversation {}: {}",
                conversation_id, e
            );
        }
    }

    async fn reconcile(&self, local_id: LocalId, stored: &StoredMessage) {
        let mut state = self.state.lock().await;
        if let Some(message) = state.messages.iter_mut().find(|m| m.local_id == local_id) {
            message.reconcile(stored);
            self.publish(&state);
        }
    }

    async fn finish(&self, request_id: u64) {
        let mut state = self.state.lock().await;
        if state.finish_generation(request_id) {
            self.publish(&state);
        }
    }

    /// Cancels the in-flight generation. Returns `false` (and changes nothing)
    /// when no generation is running.
    pub async fn stop_generation(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(in_flight) = state.in_flight.take() else {
            return false;
        };

        in_flight.cancel.cancel();
        state.phase = Phase::Idle;
        self.publish(&state);
        drop(state);

        info!("Stopped generation request {}", in_flight.request_id);
        self.toasts.push(Toast::stopped());
        true
    }

    pub async fn delete_message(&self, local_id: LocalId) -> Result<(), SessionError> {
        let durable = {
            let state = self.state.lock().await;
            state
                .messages
                .iter()
                .find(|m| m.local_id == local_id)
                .map(|m| m.id.clone())
        };

        let id = match durable {
            None => return Err(self.fail(StoreError::not_found("message", local_id).into())),
            Some(None) => return Err(self.fail(StoreError::NotPersisted.into())),
            Some(Some(id)) => id,
        };

        self.store
            .delete_message(&id)
            .await
            .map_err(|e| self.fail(e.into()))?;

        let mut state = self.state.lock().await;
        state.messages.retain(|m| m.local_id != local_id);
        self.publish(&state);
        info!("Deleted message {}", id);
        Ok(())
    }

    /// Deletes the conversation and its messages. The session then moves to the
    /// newest remaining conversation, or to a fresh one if none is left.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), SessionError> {
        let (was_active, generating_here) = {
            let state = self.state.lock().await;
            (
                state.conversation_id.as_ref() == Some(id),
                state
                    .in_flight
                    .as_ref()
                    .is_some_and(|in_flight| &in_flight.conversation_id == id),
            )
        };
        if generating_here {
            self.stop_generation().await;
        }
        // A stopped send may still be saving its user message.
        self.wait_for_sends(id).await;

        let removed = self
            .store
            .delete_messages(id)
            .await
            .map_err(|e| self.fail(e.into()))?;
        self.store
            .delete_conversation(id)
            .await
            .map_err(|e| self.fail(e.into()))?;
        info!("Deleted conversation {} with {} messages", id, removed);

        let remaining = self.list_conversations().await?;
        match remaining.first() {
            None => {
                self.new_conversation().await?;
            }
            Some(next) if was_active => {
                self.select_conversation(&next.id).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

fn conversation_title(text: &str, attachment: Option<&Attachment>) -> Option<String> {
    if !text.trim().is_empty() {
        Some(truncate_preview(text, TITLE_MAX_CHARS))
    } else {
        attachment.map(|a| a.filename.clone())
    }
}
