//! # Subscription handle returned by `on`/`once`.

use std::sync::Mutex;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle that removes one listener from the channel it was registered on.
///
/// Dropping the handle does **not** unsubscribe; call [`Subscription::unsubscribe`].
/// Unsubscribing more than once, or after the listener fired as a one-shot, is a no-op.
///
/// Subscribing a callback that is already on the channel returns an inert handle: only
/// the handle from the first subscription removes it.
pub struct Subscription {
    action: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Handle that owns nothing.
    pub(crate) fn inert() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Removes the listener. Idempotent.
    pub fn unsubscribe(&self) {
        let action = self
            .action
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
