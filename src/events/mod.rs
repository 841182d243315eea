//! General-purpose event bus and the bounded history shared with the store.
//!
//! ## Contents
//! - [`EventBus`] multi-subscriber publish/subscribe channel keyed by event name
//! - [`EmitRecord`] one entry of the bus's diagnostic history
//! - [`History`] fixed-capacity ring buffer (oldest evicted first)
//!
//! ## Quick reference
//! - **Publishers**: controllers and any collaborator holding the bus.
//! - **Consumers**: listeners registered with `on`/`once`.
//! - The state store keeps its own channels (see [`crate::state`]); both surfaces share
//!   the [`crate::listeners`] primitive.

mod bus;
mod history;

pub use bus::{EmitRecord, EventBus};
pub use history::History;
