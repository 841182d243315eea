use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::inject::{Dependencies, Injectable};
use super::provider::{Instance, Provider, ProviderKind, RegisterOptions, Registration};
use crate::error::ContainerError;

type SingletonCache = Arc<RwLock<HashMap<String, Instance>>>;

/// Snapshot of one registration, as returned by [`Container::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
    /// Registered token.
    pub token: String,
    /// Value or factory.
    pub kind: ProviderKind,
    /// Whether the produced instance is cached.
    pub singleton: bool,
    /// Whether a cached instance currently exists.
    pub instantiated: bool,
    /// Tokens resolved while this token's factory ran, in first-seen order.
    pub dependencies: Vec<String>,
}

/// Registry of named dependencies with cycle-safe resolution.
///
/// ### Responsibilities
/// - **Registration**: values, transient factories, singleton factories
/// - **Resolution**: typed (`resolve::<T>`) or raw (`resolve_any`)
/// - **Cycle detection**: per-thread resolution path, released by an RAII guard
/// - **Scoping**: child containers via [`create_child`](Self::create_child)
/// - **Construction**: [`Injectable`] types via [`create`](Self::create)
///
/// ### Rules
/// - Locks are never held while a factory runs, so factories may resolve recursively.
/// - A singleton cache slot is written at most once per token.
pub struct Container {
    registrations: RwLock<IndexMap<String, Registration>>,
    /// Cache shared with the parent (or owned, for a root container).
    shared: RwLock<SingletonCache>,
    /// Cache for tokens registered directly on a child container.
    local: SingletonCache,
    /// Tokens registered directly on this child.
    own_tokens: RwLock<HashSet<String>>,
    is_child: bool,
    resolving: Mutex<HashMap<ThreadId, Vec<String>>>,
    graph: Mutex<HashMap<String, IndexSet<String>>>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("tokens", &self.tokens())
            .field("is_child", &self.is_child)
            .finish()
    }
}

impl Container {
    /// Creates an empty root container.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(IndexMap::new()),
            shared: RwLock::new(Arc::new(RwLock::new(HashMap::new()))),
            local: Arc::new(RwLock::new(HashMap::new())),
            own_tokens: RwLock::new(HashSet::new()),
            is_child: false,
            resolving: Mutex::new(HashMap::new()),
            graph: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `provider` under `token`.
    ///
    /// ### Errors
    /// - [`ContainerError::DuplicateRegistration`] if `token` exists and `override_` is unset.
    /// - [`ContainerError::InvalidFactory`] if `factory` is set but `provider` is a value.
    ///
    /// Overriding drops any instance cached for the token in this container's scope.
    pub fn register(
        &self,
        token: &str,
        provider: Provider,
        options: RegisterOptions,
    ) -> Result<(), ContainerError> {
        if options.factory && matches!(provider, Provider::Value(_)) {
            return Err(ContainerError::InvalidFactory {
                token: token.to_string(),
            });
        }

        {
            let mut regs = write(&self.registrations);
            if regs.contains_key(token) && !options.override_ {
                return Err(ContainerError::DuplicateRegistration {
                    token: token.to_string(),
                });
            }
            regs.insert(
                token.to_string(),
                Registration {
                    provider,
                    singleton: options.singleton,
                },
            );
        }

        if self.is_child {
            write(&self.own_tokens).insert(token.to_string());
        }
        if options.override_ {
            write(&self.cache_for(token)).remove(token);
            lock(&self.graph).remove(token);
        }
        debug!(token, singleton = options.singleton, "dependency registered");
        Ok(())
    }

    /// Registers a plain value.
    pub fn register_value<T: Any + Send + Sync>(
        &self,
        token: &str,
        value: T,
    ) -> Result<(), ContainerError> {
        self.register(token, Provider::value(value), RegisterOptions::default())
    }

    /// Registers a transient factory (invoked on every resolution).
    pub fn register_factory<T, F>(&self, token: &str, f: F) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(token, Provider::factory(f), RegisterOptions::factory())
    }

    /// Registers a singleton factory (invoked once, then cached).
    pub fn register_singleton<T, F>(&self, token: &str, f: F) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(token, Provider::factory(f), RegisterOptions::singleton())
    }

    /// Registers an [`Injectable`] type, constructed through [`create`](Self::create).
    pub fn register_injectable<T: Injectable>(
        &self,
        token: &str,
        singleton: bool,
    ) -> Result<(), ContainerError> {
        let options = RegisterOptions {
            singleton,
            ..RegisterOptions::factory()
        };
        self.register(
            token,
            Provider::factory(|c: &Container| Ok(c.create::<T>(HashMap::new())?)),
            options,
        )
    }

    /// Resolves `token` and downcasts it to `T`.
    pub fn resolve<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        downcast(token, self.resolve_any(token)?)
    }

    /// Resolves `token` to its type-erased instance.
    ///
    /// ### Errors
    /// - [`ContainerError::NotFound`] for unknown tokens.
    /// - [`ContainerError::CircularDependency`] when `token` is already being resolved
    ///   on this thread; the chain lists the path in order.
    /// - Any error raised by the factory.
    pub fn resolve_any(&self, token: &str) -> Result<Instance, ContainerError> {
        let cache = self.cache_for(token);
        if let Some(instance) = read(&cache).get(token) {
            return Ok(Arc::clone(instance));
        }

        let registration = read(&self.registrations).get(token).cloned().ok_or_else(|| {
            ContainerError::NotFound {
                token: token.to_string(),
            }
        })?;

        let _guard = self.enter(token)?;
        let instance = match &registration.provider {
            Provider::Value(value) => Arc::clone(value),
            Provider::Factory(factory) => factory(self).map_err(|e| e.for_token(token))?,
        };

        if registration.singleton {
            let mut slots = write(&cache);
            let cached = slots
                .entry(token.to_string())
                .or_insert_with(|| Arc::clone(&instance));
            return Ok(Arc::clone(cached));
        }
        Ok(instance)
    }

    /// Resolves several tokens, keeping the order of `tokens`.
    pub fn resolve_many<I, S>(&self, tokens: I) -> Result<IndexMap<String, Instance>, ContainerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .map(|t| {
                let token = t.as_ref();
                self.resolve_any(token).map(|i| (token.to_string(), i))
            })
            .collect()
    }

    /// Returns `true` if `token` is registered.
    pub fn has(&self, token: &str) -> bool {
        read(&self.registrations).contains_key(token)
    }

    /// Removes one registration together with its cached instance and graph edges.
    pub fn unregister(&self, token: &str) -> bool {
        let removed = write(&self.registrations).shift_remove(token).is_some();
        write(&self.cache_for(token)).remove(token);
        write(&self.own_tokens).remove(token);
        lock(&self.graph).remove(token);
        removed
    }

    /// Removes every registration, cached instance and graph edge.
    ///
    /// A child detaches from the parent's singleton cache instead of clearing it.
    pub fn clear(&self) {
        write(&self.registrations).clear();
        write(&self.own_tokens).clear();
        write(&self.local).clear();
        if self.is_child {
            *write(&self.shared) = Arc::new(RwLock::new(HashMap::new()));
        } else {
            write(&read(&self.shared)).clear();
        }
        lock(&self.graph).clear();
    }

    /// Creates a scoped child.
    ///
    /// The child starts with copies of this container's registrations and shares its
    /// singleton cache, so resolving a parent singleton yields the same instance.
    /// Registrations made on the child never affect this container.
    pub fn create_child(&self) -> Container {
        Container {
            registrations: RwLock::new(read(&self.registrations).clone()),
            shared: RwLock::new(Arc::clone(&read(&self.shared))),
            local: Arc::new(RwLock::new(HashMap::new())),
            own_tokens: RwLock::new(HashSet::new()),
            is_child: true,
            resolving: Mutex::new(HashMap::new()),
            graph: Mutex::new(HashMap::new()),
        }
    }

    /// Constructs `T` from its declared dependencies.
    ///
    /// Each token in [`Injectable::DEPENDENCIES`] is taken from `overrides` when present,
    /// resolved otherwise. Overrides for undeclared tokens are passed through as well.
    pub fn create<T: Injectable>(
        &self,
        mut overrides: HashMap<String, Instance>,
    ) -> Result<T, ContainerError> {
        let mut resolved = IndexMap::with_capacity(T::DEPENDENCIES.len() + overrides.len());
        for &token in T::DEPENDENCIES {
            let instance = match overrides.remove(token) {
                Some(instance) => instance,
                None => self.resolve_any(token)?,
            };
            resolved.insert(token.to_string(), instance);
        }
        resolved.extend(overrides);

        T::construct(Dependencies::new(resolved))
            .map_err(|err| ContainerError::from_factory(std::any::type_name::<T>(), err))
    }

    /// Describes one registration.
    pub fn inspect(&self, token: &str) -> Option<DependencyInfo> {
        let registration = read(&self.registrations).get(token).cloned()?;
        Some(self.describe(token, &registration))
    }

    /// Describes every registration, in registration order.
    pub fn inspect_all(&self) -> Vec<DependencyInfo> {
        let regs = read(&self.registrations).clone();
        regs.iter()
            .map(|(token, registration)| self.describe(token, registration))
            .collect()
    }

    /// Registered tokens, in registration order.
    pub fn tokens(&self) -> Vec<String> {
        read(&self.registrations).keys().cloned().collect()
    }

    fn describe(&self, token: &str, registration: &Registration) -> DependencyInfo {
        DependencyInfo {
            token: token.to_string(),
            kind: registration.provider.kind(),
            singleton: registration.singleton,
            instantiated: read(&self.cache_for(token)).contains_key(token),
            dependencies: lock(&self.graph)
                .get(token)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn cache_for(&self, token: &str) -> SingletonCache {
        if self.is_child && read(&self.own_tokens).contains(token) {
            Arc::clone(&self.local)
        } else {
            Arc::clone(&read(&self.shared))
        }
    }

    /// Pushes `token` on this thread's resolution path.
    fn enter(&self, token: &str) -> Result<ResolutionGuard<'_>, ContainerError> {
        let thread = thread::current().id();
        let mut resolving = lock(&self.resolving);
        let path = resolving.entry(thread).or_default();

        if path.iter().any(|t| t == token) {
            let mut chain = path.clone();
            chain.push(token.to_string());
            return Err(ContainerError::CircularDependency { chain });
        }
        if let Some(parent) = path.last() {
            lock(&self.graph)
                .entry(parent.clone())
                .or_default()
                .insert(token.to_string());
        }
        path.push(token.to_string());

        Ok(ResolutionGuard {
            container: self,
            thread,
            token: token.to_string(),
        })
    }
}

/// Releases a token from the resolution path when dropped.
struct ResolutionGuard<'a> {
    container: &'a Container,
    thread: ThreadId,
    token: String,
}

impl Drop for ResolutionGuard<'_> {
    fn drop(&mut self) {
        let mut resolving = lock(&self.container.resolving);
        if let Some(path) = resolving.get_mut(&self.thread) {
            if let Some(pos) = path.iter().rposition(|t| *t == self.token) {
                path.remove(pos);
            }
            if path.is_empty() {
                resolving.remove(&self.thread);
            }
        }
    }
}

impl ContainerError {
    /// Fills in the token of a factory failure raised without one.
    fn for_token(self, token: &str) -> Self {
        match self {
            ContainerError::FactoryFailed { token: t, reason } if t.is_empty() => {
                ContainerError::FactoryFailed {
                    token: token.to_string(),
                    reason,
                }
            }
            other => other,
        }
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(
    token: &str,
    instance: Instance,
) -> Result<Arc<T>, ContainerError> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            token: token.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
