//! # Listener callbacks.
//!
//! A [`Listener`] is a shared (`Arc`) callback. Cloning a listener keeps its identity,
//! which is what `off` and deduplication compare.
//!
//! Two flavors exist:
//! - **sync**: `Fn(&T) -> ListenerResult`, run inline by `emit`;
//! - **async**: `Fn(Arc<T>) -> Future<Output = ListenerResult>`, awaited in order by
//!   `emit_async` and spawned onto the current runtime by `emit`.
//!
//! ## Example
//! ```rust
//! use appcore::Listener;
//!
//! let log: Listener<String> = Listener::new(|msg: &String| {
//!     println!("got {msg}");
//!     Ok(())
//! });
//! let same = log.clone();
//! assert!(log.same_as(&same));
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Outcome of a listener invocation. Errors are reported, never propagated.
pub type ListenerResult = anyhow::Result<()>;

type SyncFn<T> = dyn Fn(&T) -> ListenerResult + Send + Sync;
type AsyncFn<T> = dyn Fn(Arc<T>) -> BoxFuture<'static, ListenerResult> + Send + Sync;

/// Shared event callback.
pub enum Listener<T> {
    /// Runs inline in the emitting context.
    Sync(Arc<SyncFn<T>>),
    /// Produces a future per invocation.
    Async(Arc<AsyncFn<T>>),
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Listener::Sync(f) => Listener::Sync(Arc::clone(f)),
            Listener::Async(f) => Listener::Async(Arc::clone(f)),
        }
    }
}

impl<T> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Listener::Sync(_) => "sync",
            Listener::Async(_) => "async",
        };
        f.debug_struct("Listener")
            .field("kind", &kind)
            .field("ptr", &self.identity())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Listener<T> {
    /// Wraps a synchronous callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        Listener::Sync(Arc::new(f))
    }

    /// Wraps a callback producing a fresh future per invocation.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        Listener::Async(Arc::new(move |payload| f(payload).boxed()))
    }
}

impl<T> Listener<T> {
    /// Returns `true` when both handles point at the same callback.
    pub fn same_as(&self, other: &Listener<T>) -> bool {
        self.identity() == other.identity()
    }

    /// Address of the shared callback, without vtable metadata.
    pub(crate) fn identity(&self) -> *const () {
        match self {
            Listener::Sync(f) => Arc::as_ptr(f) as *const (),
            Listener::Async(f) => Arc::as_ptr(f) as *const (),
        }
    }
}
