//! `loomerp-core`: domain building blocks shared by every document type.
//!
//! Pure domain code only (no IO): identifiers, the aggregate contract, the error model
//! and the status lifecycle guard.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, LifecycleAggregate};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use lifecycle::{
    is_transition_allowed, is_transition_allowed_str, Actor, ChangeStatus, LifecycleStatus, LifecycleTable,
    StatusChange, StatusLifecycle, StatusStamp, StatusTracker, Transition, TransitionRequest,
    TransitionRow,
};
pub use value_object::ValueObject;
