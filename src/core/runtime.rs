//! # Runtime: explicit assembly of the four core components.
//!
//! [`Runtime`] owns one [`EventBus`], one [`StateStore`] and one [`Poller`], and registers
//! them (plus the [`Config`]) in a root [`Container`] under the names in [`tokens`], so
//! that application controllers can declare them as dependencies.
//!
//! ## Architecture
//! ```text
//! RuntimeBuilder::new(cfg)
//!     .with_injectable::<JobController>("jobController", true)
//!     .build()
//!         │
//!         ├─► EventBus::new(cfg.event_history_capacity)  ──► container["eventBus"]
//!         ├─► StateStore::from_config(&cfg)              ──► container["stateStore"]
//!         ├─► Poller::new()                              ──► container["poller"]
//!         ├─► cfg                                        ──► container["config"]
//!         └─► user registrations, in call order
//!
//! Runtime::shutdown()
//!     ├─► poller.cleanup()   (cancel every loop)
//!     ├─► store.cleanup()    (countdown, monitors, poll-stop hooks)
//!     └─► bus.emit("runtime:shutdown")
//! ```
//!
//! ## Rules
//! - Components never reference each other; only the container and controllers see all of them.
//! - Core tokens cannot be overridden through the builder.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::container::Container;
use crate::core::builder::RuntimeBuilder;
use crate::core::Config;
use crate::error::ContainerError;
use crate::events::EventBus;
use crate::polling::Poller;
use crate::state::StateStore;

/// Container tokens of the core components.
pub mod tokens {
    pub const CONFIG: &str = "config";
    pub const EVENT_BUS: &str = "eventBus";
    pub const STATE_STORE: &str = "stateStore";
    pub const POLLER: &str = "poller";
}

/// Bus event emitted by [`Runtime::shutdown`].
pub const SHUTDOWN_EVENT: &str = "runtime:shutdown";

/// The assembled runtime core.
///
/// ## Example
/// ```rust
/// use appcore::{tokens, Config, EventBus, Runtime};
///
/// let rt = Runtime::new(Config::default()).unwrap();
/// let bus = rt.container().resolve::<EventBus>(tokens::EVENT_BUS).unwrap();
/// assert_eq!(bus.emit("ping", serde_json::json!(1)), 0);
/// assert_eq!(rt.bus().history().len(), 1);
/// ```
#[derive(Debug)]
pub struct Runtime {
    cfg: Config,
    container: Arc<Container>,
    bus: EventBus,
    store: StateStore,
    poller: Poller,
}

impl Runtime {
    /// Builds a runtime with no extra registrations.
    pub fn new(cfg: Config) -> Result<Self, ContainerError> {
        RuntimeBuilder::new(cfg).build()
    }

    /// Starts a [`RuntimeBuilder`].
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn assemble(cfg: Config) -> Result<Self, ContainerError> {
        let container = Arc::new(Container::new());
        let bus = EventBus::new(cfg.event_history_capacity);
        let store = StateStore::from_config(&cfg);
        let poller = Poller::new();

        container.register_value(tokens::CONFIG, cfg.clone())?;
        container.register_value(tokens::EVENT_BUS, bus.clone())?;
        container.register_value(tokens::STATE_STORE, store.clone())?;
        container.register_value(tokens::POLLER, poller.clone())?;
        debug!("runtime assembled");

        Ok(Self {
            cfg,
            container,
            bus,
            store,
            poller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Root container holding the core components and user registrations.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Stops every poll loop and store timer, then announces [`SHUTDOWN_EVENT`] on the bus.
    ///
    /// Listeners and state are kept; calling it again is harmless.
    pub fn shutdown(&self) {
        self.poller.cleanup();
        self.store.cleanup();
        self.bus.emit(SHUTDOWN_EVENT, Value::Null);
        debug!("runtime shut down");
    }
}
