//! Runtime core: configuration and explicit assembly.
//!
//! - [`config`]: global [`Config`] with documented defaults;
//! - [`runtime`]: [`Runtime`] owning the bus, store, poller and root container;
//! - [`builder`]: [`RuntimeBuilder`] for application registrations.

mod builder;
mod config;
mod runtime;

pub use builder::RuntimeBuilder;
pub use config::Config;
pub use runtime::{tokens, Runtime, SHUTDOWN_EVENT};
