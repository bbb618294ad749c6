//! Ledger events and their distribution.
//!
//! Movements are committed to the ledger store first; the bus only fans the
//! committed facts out to downstream consumers (projections, notifiers).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
