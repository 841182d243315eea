//! # Dependency container.
//!
//! Registers named dependency tokens and resolves them on demand.
//!
//! ## Architecture
//! ```text
//! register(token, Provider::Value | Provider::Factory, RegisterOptions)
//!      │
//!      ▼
//! registrations (ordered) ──► resolve(token)
//!                                 ├─► cached singleton?  → return it
//!                                 ├─► not registered?    → NotFound
//!                                 ├─► already on path?   → CircularDependency(a -> b -> a)
//!                                 ├─► ResolutionGuard    (released on every exit path)
//!                                 ├─► factory(&container) (may resolve further tokens)
//!                                 └─► singleton? cache instance
//! ```
//!
//! ## Rules
//! - A registered token is never replaced silently (`override_` required).
//! - Singleton instances are cached apart from registrations and written once.
//! - Child containers copy registrations and share the parent's singleton cache;
//!   tokens registered on the child resolve and cache locally.
//! - [`Injectable`] types declare their dependency tokens explicitly.

mod core;
mod inject;
mod provider;

pub use self::core::{Container, DependencyInfo};
pub use inject::{Dependencies, Injectable};
pub use provider::{FactoryFn, Instance, Provider, ProviderKind, RegisterOptions};
