use super::SessionError;
use crate::generation::GenerationError;
use crate::store::StoreError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub description: String,
}

impl Toast {
    pub fn info(title: &str, description: &str) -> Self {
        Self {
            level: ToastLevel::Info,
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn error(description: &str) -> Self {
        Self {
            level: ToastLevel::Error,
            title: "Error".to_string(),
            description: description.to_string(),
        }
    }

    pub fn stopped() -> Self {
        Self::info("Stopped", "Response generation was stopped.")
    }

    pub fn from_error(error: &SessionError) -> Self {
        match error {
            SessionError::Busy => Self::info("Please wait", "A response is still being generated."),
            SessionError::Generation(GenerationError::Cancelled) => Self::stopped(),
            SessionError::Generation(_) => {
                Self::error("Failed to generate response. Please try again.")
            }
            SessionError::Store(StoreError::NotPersisted) => {
                Self::error("This message is still being saved and cannot be deleted yet.")
            }
            SessionError::Store(StoreError::NotFound { entity, .. }) => {
                Self::error(&format!("The {} no longer exists.", entity))
            }
            SessionError::Store(_) => {
                Self::error("Failed to save your conversation. Please try again.")
            }
        }
    }
}

/// Process-wide notification queue shared by the controller (producer) and the
/// front end (consumer).
#[derive(Clone, Default)]
pub struct Toasts {
    queue: Arc<Mutex<VecDeque<Toast>>>,
    notify: Arc<Notify>,
}

impl Toasts {
    pub fn push(&self, toast: Toast) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(toast);
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Vec<Toast> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    /// Resolves once a toast has been pushed since the last wait.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_toasts_in_push_order() {
        let toasts = Toasts::default();
        toasts.push(Toast::stopped());
        toasts.push(Toast::error("boom"));

        let drained = toasts.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].title, "Stopped");
        assert_eq!(drained[1].level, ToastLevel::Error);
        assert!(toasts.drain().is_empty());
    }

    #[test]
    fn stopped_and_failed_read_differently() {
        let stopped = Toast::from_error(&SessionError::Generation(GenerationError::Cancelled));
        let failed = Toast::from_error(&SessionError::Generation(GenerationError::Status {
            status: 500,
            message: "internal".into(),
        }));

        assert_eq!(stopped.level, ToastLevel::Info);
        assert_eq!(failed.level, ToastLevel::Error);
        assert_ne!(stopped.description, failed.description);
    }

    #[tokio::test]
    async fn wait_wakes_after_push() {
        let toasts = Toasts::default();
        let waiter = {
            let toasts = toasts.clone();
            tokio::spawn(async move { toasts.wait().await })
        };

        toasts.push(Toast::stopped());
        waiter.await.unwrap();
        assert_eq!(toasts.drain().len(), 1);
    }
}
