//! # appcore
//!
//! **appcore** is the runtime core of an interactive job-submission tool.
//!
//! It provides four independent building blocks, wired together by an explicit
//! [`Runtime`]: a dependency container, an event bus, a reactive state store and a
//! polling orchestrator for long-running backend jobs.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!                 │  Container (tokens → values / factories)   │
//!                 │  eventBus · stateStore · poller · config   │
//!                 └──────┬──────────────────────────────┬──────┘
//!                        │ create::<Controller>()        │ resolve
//!                        ▼                               ▼
//!                 ┌──────────────┐               ┌──────────────┐
//!                 │ Controller A │               │ Controller B │
//!                 └──┬────────┬──┘               └──┬───────────┘
//!          start(id) │        │ emit                │ on("job:finished")
//!                    ▼        ▼                     ▼
//!            ┌─────────────┐  ┌──────────────────────────────────┐
//!            │   Poller    │  │            EventBus              │
//!            │ (PollActor  │  │ (named events, snapshot dispatch)│
//!            │  per id)    │  └──────────────────────────────────┘
//!            └──────┬──────┘
//!   on_update(r)    │
//!                   ▼
//!            ┌──────────────────────────────────────────────────┐
//!            │ StateStore (AppState tree)                       │
//!            │  set / add_job / update_job ... ──► commit       │
//!            │    ├─► history                                   │
//!            │    ├─► path listeners ("jobs.j1.status")         │
//!            │    └─► "change" + domain channels ("job:added")  │
//!            └──────────────────────────────────────────────────┘
//! ```
//!
//! ### Poll loop
//! ```text
//! start(id) ──► PollActor::run()
//!
//! loop {
//!   ├─► elapsed > max_duration ─► on_error(DurationExceeded), exit
//!   ├─► probe()
//!   │     ├─ Ok  ──► on_update; terminal? ─► on_complete, exit
//!   │     │          else retries = 0, sleep(interval)
//!   │     └─ Err ──► on_error; retries == max_retries? ─► exit
//!   │                else retries += 1, sleep(min(interval·2^retries, 60s))
//!   └─ cancelled (stop / PollHandle::cancel) ─► exit
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types                                |
//! |-------------------|---------------------------------------------------------------|------------------------------------------|
//! | **Container**     | Token-based registration, singletons, child scopes, injection | [`Container`], [`Injectable`]            |
//! | **Events**        | Named publish/subscribe with isolation and bounded history    | [`EventBus`], [`Listener`]               |
//! | **State**         | Path-addressed state tree with entity lifecycle and timers    | [`StateStore`], [`StoreEvent`]           |
//! | **Polling**       | Deduplicated poll loops with capped exponential backoff       | [`Poller`], [`PollOptions`], [`ProbeFn`] |
//! | **Policies**      | Retry delay growth and jitter                                 | [`BackoffPolicy`], [`JitterPolicy`]      |
//! | **Errors**        | Typed errors per component                                    | [`ContainerError`], [`PollError`]        |
//! | **Configuration** | Centralized defaults                                          | [`Config`]                               |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a listener mirroring store events into `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use appcore::state::JobPatch;
//! use appcore::{Config, PollOptions, ProbeError, ProbeFn, ProbeRef, Runtime};
//! use serde_json::{json, Value};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = Runtime::new(Config::default())?;
//!     rt.store().add_job("j1", JobPatch::default());
//!
//!     let probe: ProbeRef<Value> = ProbeFn::arc(|| async {
//!         Ok::<_, ProbeError>(json!({ "status": "completed" }))
//!     });
//!     let store = rt.store().clone();
//!     rt.poller().start(
//!         "j1",
//!         probe,
//!         PollOptions::with_defaults(rt.config())
//!             .interval(Duration::from_millis(100))
//!             .on_complete(move |_: &Value| {
//!                 store.update_job_status("j1", appcore::state::JobStatus::Completed);
//!             }),
//!     );
//!
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     assert_eq!(rt.store().get("jobs.j1.status"), Some(json!("completed")));
//!     rt.shutdown();
//!     Ok(())
//! }
//! ```

mod container;
mod core;
mod error;
mod events;
mod listeners;
mod policies;
mod polling;
pub mod state;

// ---- Public re-exports ----

pub use crate::container::{
    Container, Dependencies, DependencyInfo, FactoryFn, Injectable, Instance, Provider,
    ProviderKind, RegisterOptions,
};
pub use crate::core::{tokens, Config, Runtime, RuntimeBuilder, SHUTDOWN_EVENT};
pub use crate::error::{ContainerError, EventError, PollError, ProbeError, StateError};
pub use crate::events::{EmitRecord, EventBus, History};
pub use crate::listeners::{Listener, ListenerResult, Subscription};
pub use crate::policies::{BackoffPolicy, JitterPolicy};
pub use crate::polling::{
    LoopStatus, PollHandle, PollInfo, PollOptions, Poller, Probe, ProbeFn, ProbeOutcome,
    ProbeRef, TERMINAL_STATUSES,
};
pub use crate::state::{StateStore, StoreEvent};

// Optional: a predefined listener that logs store events.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use crate::listeners::LogWriter;
