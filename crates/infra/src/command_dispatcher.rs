//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓  lock the (tenant, aggregate) stream
//! 1. Load events from store (tenant-scoped) and validate the stream
//!   ↓
//! 2. Check the caller's expected version, if any
//!   ↓
//! 3. Rehydrate the aggregate
//!   ↓
//! 4. Handle the command (pure decision, produces events)
//!   ↓
//! 5. Append to the store with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 6. Publish committed envelopes to the bus
//! ```
//!
//! Commands against the same stream are serialized by an in-process lock; the
//! store's optimistic check still catches writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use loomerp_core::{
    Aggregate, AggregateId, DomainError, ExpectedVersion, LifecycleAggregate, TenantId,
};
use loomerp_events::{status_change, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale expected version or a concurrent writer won the race.
    #[error("conflict: {0}")]
    Concurrency(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("{entity} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found")]
    NotFound,
    /// Historical payload no longer decodes into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("publish failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidTransition { entity, from, to } => {
                DispatchError::InvalidTransition { entity, from, to }
            }
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized(msg) => DispatchError::Unauthorized(msg),
            DomainError::NotFound => DispatchError::NotFound,
        }
    }
}

/// Result of a dispatched command: the aggregate after the new events were applied,
/// plus what was committed (empty for idempotent no-ops).
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

type StreamKey = (TenantId, AggregateId);

pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    locks: Mutex<HashMap<StreamKey, Arc<Mutex<()>>>>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn stream_lock(&self, key: StreamKey) -> Result<Arc<Mutex<()>>, DispatchError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DispatchError::Store(EventStoreError::Backend("stream lock table poisoned".to_string())))?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Forget the stream's lock once nobody else holds or waits on it.
    ///
    /// Clones are only handed out under the table lock and every holder calls this
    /// after dropping its clone, so whoever finds the table's reference alone removes it.
    fn release_stream_lock(&self, key: StreamKey, lock: Arc<Mutex<()>>) {
        drop(lock);
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(&key).is_some_and(|held| Arc::strong_count(held) == 1) {
                locks.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn tracked_streams(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command without a caller-supplied version expectation.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatch_expecting(tenant_id, aggregate_id, aggregate_type, command, None, make_aggregate)
            .map(|d| d.committed)
    }

    /// Dispatch a command, failing with `Concurrency` when the stream is no longer at
    /// `expected_version`.
    pub fn dispatch_expecting<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        expected_version: Option<u64>,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        let key = (tenant_id, aggregate_id);
        let lock = self.stream_lock(key)?;

        let result = {
            let _guard = lock
                .lock()
                .map_err(|_| DispatchError::Store(EventStoreError::Backend("stream lock poisoned".to_string())))?;
            self.run(tenant_id, aggregate_id, aggregate_type, &command, expected_version, make_aggregate)
        };

        self.release_stream_lock(key, lock);

        if let Err(err) = &result {
            log_rejection(tenant_id, aggregate_id, aggregate_type, err);
        }
        result
    }

    fn run<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        expected_version: Option<u64>,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let current = stream_version(&history);
        ExpectedVersion::from(expected_version).check(current)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(tenant_id, aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(current))?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        for stored in &committed {
            let envelope = stored.to_envelope();
            if let Some(change) = status_change(&envelope) {
                tracing::info!(
                    tenant_id = %tenant_id,
                    aggregate_type,
                    aggregate_id = %aggregate_id,
                    from = %change.from,
                    to = %change.to,
                    actor = %change.actor,
                    version = stored.sequence_number,
                    "status changed"
                );
            }
            self.bus
                .publish(envelope)
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched { aggregate, committed })
    }

    /// Rehydrate an aggregate without handling a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch to a lifecycle aggregate, using its own stream type and constructor.
    pub fn execute<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        command: A::Command,
        expected_version: Option<u64>,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: LifecycleAggregate,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatch_expecting(
            tenant_id,
            aggregate_id,
            A::aggregate_type(),
            command,
            expected_version,
            |_, id| A::empty(id),
        )
    }

    /// Load an existing lifecycle aggregate (`NotFound` if it was never created).
    pub fn load_existing<A>(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<A, DispatchError>
    where
        A: LifecycleAggregate,
        A::Event: DeserializeOwned,
    {
        let aggregate = self.load(tenant_id, aggregate_id, |_, id| A::empty(id))?;
        if !aggregate.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(aggregate)
    }
}

fn log_rejection(tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str, err: &DispatchError) {
    match err {
        DispatchError::InvalidTransition { from, to, .. } => tracing::warn!(
            tenant_id = %tenant_id,
            aggregate_type,
            aggregate_id = %aggregate_id,
            from = %from,
            to = %to,
            "transition rejected"
        ),
        DispatchError::Unauthorized(reason) => tracing::warn!(
            tenant_id = %tenant_id,
            aggregate_type,
            aggregate_id = %aggregate_id,
            reason = %reason,
            "command unauthorized"
        ),
        DispatchError::Concurrency(reason) => tracing::info!(
            tenant_id = %tenant_id,
            aggregate_type,
            aggregate_id = %aggregate_id,
            reason = %reason,
            "concurrency conflict"
        ),
        DispatchError::Store(_) | DispatchError::Deserialize(_) | DispatchError::Publish(_) => tracing::error!(
            tenant_id = %tenant_id,
            aggregate_type,
            aggregate_id = %aggregate_id,
            error = %err,
            "command failed in infrastructure"
        ),
        _ => {}
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use chrono::Utc;
    use loomerp_core::{Actor, TransitionRequest, UserId};
    use loomerp_events::InMemoryEventBus;
    use loomerp_finance::Money;
    use loomerp_purchasing::{
        AddLine, CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderStatus,
    };

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create_order(d: &Dispatcher, tenant_id: TenantId) -> AggregateId {
        let order_id = AggregateId::new();
        d.execute::<PurchaseOrder>(
            tenant_id,
            order_id,
            PurchaseOrderCommand::Create(CreatePurchaseOrder {
                tenant_id,
                order_id,
                reference: "PO-2024-0042".to_string(),
                vendor_code: "V-DENIM-07".to_string(),
                lines: vec![],
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
            None,
        )
        .unwrap();
        d.execute::<PurchaseOrder>(
            tenant_id,
            order_id,
            PurchaseOrderCommand::AddLine(AddLine {
                tenant_id,
                order_id,
                material_code: "FAB-DENIM-12OZ".to_string(),
                quantity: 400,
                unit_price: Money::from_minor(52_000),
                occurred_at: Utc::now(),
            }),
            None,
        )
        .unwrap();
        order_id
    }

    fn submit(tenant_id: TenantId, order_id: AggregateId, actor: Actor) -> PurchaseOrderCommand {
        PurchaseOrder::transition_command(
            tenant_id,
            order_id,
            TransitionRequest::new(PurchaseOrderStatus::PendingApproval, actor, Utc::now()),
        )
    }

    #[test]
    fn commits_publishes_and_returns_the_updated_aggregate() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let order_id = create_order(&d, tenant_id);

        let out = d
            .execute::<PurchaseOrder>(tenant_id, order_id, submit(tenant_id, order_id, Actor::system()), Some(2))
            .unwrap();

        assert_eq!(out.aggregate.status(), PurchaseOrderStatus::PendingApproval);
        assert_eq!(out.committed.len(), 1);
        assert_eq!(out.committed[0].sequence_number, 3);
        assert_eq!(sub.drain().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_conflict_and_appends_nothing() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let order_id = create_order(&d, tenant_id);

        let err = d
            .execute::<PurchaseOrder>(tenant_id, order_id, submit(tenant_id, order_id, Actor::system()), Some(1))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert_eq!(d.store().load_stream(tenant_id, order_id).unwrap().len(), 2);
    }

    #[test]
    fn domain_rejections_map_to_dispatch_errors() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let order_id = create_order(&d, tenant_id);

        let clerk = Actor::new(UserId::new(), ["purchases.orders.view"]);
        let err = d
            .execute::<PurchaseOrder>(tenant_id, order_id, submit(tenant_id, order_id, clerk), None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized(_)));

        let skip = PurchaseOrder::transition_command(
            tenant_id,
            order_id,
            TransitionRequest::new(PurchaseOrderStatus::Closed, Actor::system(), Utc::now()),
        );
        let err = d.execute::<PurchaseOrder>(tenant_id, order_id, skip, None).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { ref from, ref to, .. } if from == "draft" && to == "closed"));

        let missing = d.load_existing::<PurchaseOrder>(tenant_id, AggregateId::new()).unwrap_err();
        assert!(matches!(missing, DispatchError::NotFound));
    }

    #[test]
    fn concurrent_transitions_on_one_order_apply_exactly_once() {
        let d = Arc::new(dispatcher());
        let tenant_id = TenantId::new();
        let order_id = create_order(&d, tenant_id);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                thread::spawn(move || {
                    d.execute::<PurchaseOrder>(tenant_id, order_id, submit(tenant_id, order_id, Actor::system()), None)
                        .is_ok()
                })
            })
            .collect();
        let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

        assert_eq!(successes, 1);
        let order = d.load_existing::<PurchaseOrder>(tenant_id, order_id).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::PendingApproval);
        assert_eq!(order.status_tracker().history().len(), 1);
        // Contended locks are still released once every caller is done.
        assert_eq!(d.tracked_streams(), 0);
    }
}
