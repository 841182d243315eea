//! # Registration building blocks.

use std::any::Any;
use std::sync::Arc;

use crate::container::Container;
use crate::error::ContainerError;

/// Type-erased shared instance stored by the container.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Factory invoked with the resolving container as its sole argument.
pub type FactoryFn = Arc<dyn Fn(&Container) -> Result<Instance, ContainerError> + Send + Sync>;

/// What a token resolves to.
#[derive(Clone)]
pub enum Provider {
    /// A ready value, shared as-is on every resolution.
    Value(Instance),
    /// A function producing the value.
    Factory(FactoryFn),
}

impl Provider {
    /// Wraps a plain value.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Provider::Value(Arc::new(value))
    }

    /// Wraps an already shared value without re-boxing it.
    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Provider::Value(value)
    }

    /// Wraps a factory.
    ///
    /// Errors returned by the factory keep their [`ContainerError`] variant when they are
    /// one (e.g. a nested `CircularDependency`); anything else becomes
    /// [`ContainerError::FactoryFailed`].
    pub fn factory<T, F>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Provider::Factory(Arc::new(move |container: &Container| {
            f(container)
                .map(|value| Arc::new(value) as Instance)
                .map_err(|err| ContainerError::from_factory("", err))
        }))
    }

    /// Returns the provider kind.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Value(_) => ProviderKind::Value,
            Provider::Factory(_) => ProviderKind::Factory,
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Provider").field(&self.kind()).finish()
    }
}

/// Provider classification reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Value,
    Factory,
}

/// Options accepted by [`Container::register`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Cache the first produced instance and reuse it.
    pub singleton: bool,
    /// The provider must be a factory.
    pub factory: bool,
    /// Replace an existing registration.
    pub override_: bool,
}

impl RegisterOptions {
    /// Options for a singleton factory.
    pub fn singleton() -> Self {
        Self {
            singleton: true,
            factory: true,
            override_: false,
        }
    }

    /// Options for a transient factory.
    pub fn factory() -> Self {
        Self {
            factory: true,
            ..Self::default()
        }
    }

    /// Returns these options with `override_` set.
    pub fn with_override(mut self) -> Self {
        self.override_ = true;
        self
    }
}

/// Stored registration.
#[derive(Clone, Debug)]
pub(crate) struct Registration {
    pub provider: Provider,
    pub singleton: bool,
}

impl ContainerError {
    /// Keeps container errors raised inside a factory, wraps anything else.
    pub(crate) fn from_factory(token: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ContainerError>() {
            Ok(inner) => inner,
            Err(other) => ContainerError::FactoryFailed {
                token: token.to_string(),
                reason: format!("{other:#}"),
            },
        }
    }
}
