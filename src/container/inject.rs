//! # Constructor injection with declared dependency lists.
//!
//! A type opts into [`Container::create`](crate::Container::create) by implementing
//! [`Injectable`]: it lists the tokens it needs and builds itself from the resolved
//! [`Dependencies`].
//!
//! ## Example
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use appcore::{Container, Dependencies, Injectable};
//!
//! struct Greeter {
//!     name: Arc<String>,
//! }
//!
//! impl Injectable for Greeter {
//!     const DEPENDENCIES: &'static [&'static str] = &["name"];
//!
//!     fn construct(deps: Dependencies) -> anyhow::Result<Self> {
//!         Ok(Self { name: deps.get("name")? })
//!     }
//! }
//!
//! let c = Container::new();
//! c.register_value("name", "world".to_string()).unwrap();
//! let g: Greeter = c.create(HashMap::new()).unwrap();
//! assert_eq!(*g.name, "world");
//! ```

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use super::core::downcast;
use super::provider::Instance;
use crate::error::ContainerError;

/// A type the container can construct from named dependencies.
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Tokens resolved (or taken from overrides) before [`construct`](Self::construct).
    const DEPENDENCIES: &'static [&'static str];

    /// Builds the value from its resolved dependencies.
    fn construct(deps: Dependencies) -> anyhow::Result<Self>;
}

/// Resolved dependencies handed to [`Injectable::construct`], keyed by token.
#[derive(Clone, Default)]
pub struct Dependencies {
    resolved: IndexMap<String, Instance>,
}

impl Dependencies {
    pub(crate) fn new(resolved: IndexMap<String, Instance>) -> Self {
        Self { resolved }
    }

    /// Returns the dependency under `token` as `T`.
    pub fn get<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        let instance = self
            .resolved
            .get(token)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound {
                token: token.to_string(),
            })?;
        downcast(token, instance)
    }

    /// Returns the type-erased dependency under `token`.
    pub fn get_any(&self, token: &str) -> Option<Instance> {
        self.resolved.get(token).cloned()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.resolved.contains_key(token)
    }

    /// Tokens in declaration order, followed by extra overrides.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.resolved.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.resolved.keys()).finish()
    }
}
