//! Append-only event store boundary.
//!
//! Tenant-scoped streams keyed by `(tenant_id, aggregate_id)`, with an in-memory
//! backend for development/tests and a Postgres backend for persistent deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
