//! # Listener primitive shared by the event bus and the state store.
//!
//! Both pub/sub surfaces of the crate keep their own channels, but subscribe and
//! dispatch through the same building blocks:
//!
//! ```text
//! on(event, Listener) ──► ListenerSet (per event, ordered, deduplicated by Arc identity)
//!
//! emit(event, payload)
//!     │
//!     ├──► ListenerSet::take_snapshot()  (one-shots removed before anything runs)
//!     └──► dispatch(snapshot, payload)
//!              ├──► listener 1 ──► Ok            → counted
//!              ├──► listener 2 ──► Err / panic   → tracing::warn!, not counted
//!              └──► listener N ──► Ok            → counted
//! ```
//!
//! ## Rules
//! - **Snapshot iteration**: subscribing or unsubscribing during dispatch never changes
//!   which listeners fire in that cycle.
//! - **Isolation**: a failing listener never prevents the next one from running.
//! - **Identity**: the same [`Listener`] (same `Arc`) is stored at most once per event.

mod listener;
mod listener_set;
mod subscription;

pub use listener::{Listener, ListenerResult};
pub(crate) use listener_set::{dispatch, dispatch_async, panic_message, validate_channel, ListenerSet};
pub use subscription::Subscription;

#[cfg(feature = "logging")]
mod log;
#[cfg(feature = "logging")]
pub use log::LogWriter;
