//! Saga / process manager mechanics (framework only, no business rules).
//!
//! A saga instance is identified by a correlation id (e.g. the GRN whose inspection
//! outcome triggers follow-up documents). Infra derives a deterministic saga stream id
//! from `(saga_type, correlation)`, persists the saga's own events into the event
//! store, and executes the commands the saga asks for. Runners must tolerate duplicate
//! deliveries: `react` sees the state persisted so far and emits nothing twice.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use loomerp_core::{AggregateId, TenantId};

use crate::EventEnvelope;

/// Actions a saga can emit in response to an incoming domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaAction {
    /// Append a saga event (JSON payload) to this saga's stream.
    Emit {
        event_type: String,
        payload: JsonValue,
    },
    /// Dispatch a command to a target aggregate.
    Command {
        aggregate_type: String,
        aggregate_id: AggregateId,
        command_type: String,
        payload: JsonValue,
    },
    /// Mark the saga as completed.
    Complete,
}

/// Saga contract.
pub trait Saga: Send + Sync + 'static {
    /// Typed state machine (serde for persistence).
    type State: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Saga events, persisted in the saga's own stream.
    type SagaEvent: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Routes incoming events to a saga instance.
    type CorrelationId: Clone + Send + Sync + 'static;

    /// Stable saga type identifier (stream aggregate type, e.g. "saga.grn_discrepancy").
    fn saga_type() -> &'static str;

    /// Extract the correlation id from a domain event (None if not relevant).
    fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<Self::CorrelationId>;

    /// Deterministic saga stream id (per tenant).
    fn saga_id(tenant_id: TenantId, correlation: &Self::CorrelationId) -> AggregateId;

    fn initial_state(_tenant_id: TenantId, _correlation: &Self::CorrelationId) -> Self::State {
        Self::State::default()
    }

    /// Apply a saga event to the state machine.
    fn apply(state: &mut Self::State, event: &Self::SagaEvent);

    /// React to an incoming domain event.
    ///
    /// Infra persists any `Emit` events (re-applying them to state) and executes
    /// `Command` actions.
    fn react(
        state: &Self::State,
        tenant_id: TenantId,
        correlation: &Self::CorrelationId,
        incoming: &EventEnvelope<JsonValue>,
    ) -> Vec<SagaAction>;
}
