//! # Builder for a [`Runtime`] with application registrations.
//!
//! Collects value, factory and [`Injectable`] registrations, then
//! [`build`](RuntimeBuilder::build) assembles the core components and applies them in
//! order. The core tokens (`config`, `eventBus`, `stateStore`, `poller`) are registered
//! first, so application factories can resolve them.

use std::any::Any;

use crate::container::{Container, Injectable};
use crate::core::runtime::{tokens, Runtime};
use crate::core::Config;
use crate::error::ContainerError;

type Registration = Box<dyn FnOnce(&Container) -> Result<(), ContainerError> + Send>;

/// Builder for a [`Runtime`] with application registrations.
pub struct RuntimeBuilder {
    cfg: Config,
    registrations: Vec<Registration>,
}

impl RuntimeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            registrations: Vec::new(),
        }
    }

    /// Registers a plain value.
    pub fn with_value<T: Any + Send + Sync>(mut self, token: &str, value: T) -> Self {
        let token = token.to_string();
        self.registrations
            .push(Box::new(move |c| c.register_value(&token, value)));
        self
    }

    /// Registers a factory, cached after first use when `singleton` is set.
    pub fn with_factory<T, F>(mut self, token: &str, singleton: bool, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let token = token.to_string();
        self.registrations.push(Box::new(move |c| {
            if singleton {
                c.register_singleton(&token, f)
            } else {
                c.register_factory(&token, f)
            }
        }));
        self
    }

    /// Registers an [`Injectable`] controller or service.
    pub fn with_injectable<T: Injectable>(mut self, token: &str, singleton: bool) -> Self {
        let token = token.to_string();
        self.registrations
            .push(Box::new(move |c| c.register_injectable::<T>(&token, singleton)));
        self
    }

    /// Builds the runtime.
    ///
    /// The core components are registered first, then user registrations in call order.
    ///
    /// ### Errors
    /// The first registration error, e.g. [`ContainerError::DuplicateRegistration`] for a
    /// token that collides with one of the core [`tokens`].
    pub fn build(self) -> Result<Runtime, ContainerError> {
        let runtime = Runtime::assemble(self.cfg)?;
        for register in self.registrations {
            register(runtime.container().as_ref())?;
        }
        Ok(runtime)
    }
}
