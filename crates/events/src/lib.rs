//! `loomerp-events`: event mechanics shared by domain crates and infrastructure.
//!
//! Contracts only (no storage, no business rules): the `Event` trait, tenant-scoped
//! envelopes, the pub/sub bus, saga mechanics and helpers for reading status changes
//! out of serialized events.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod saga;
pub mod status;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::{Event, LifecycleEvent};
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use saga::{Saga, SagaAction};
pub use status::{created_body, status_change, variant_body};
