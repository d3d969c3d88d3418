//! Everything that happens after an event is committed.
//!
//! `EventProcessor::process` is the single fan-out point for a committed envelope:
//! status board, GRN discrepancy saga, PO receipts and department notifications, in
//! that order. Each stage is idempotent, so the whole pipeline is safe under
//! redelivery, and a failing stage is logged without starving the others.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use loomerp_core::{AggregateId, TenantId};
use loomerp_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;
use crate::projections::{StatusBoardError, StatusBoardProjection, StatusRecord};
use crate::reactors::{
    DepartmentNotification, InMemoryNotificationSink, NotificationReactor, NotificationRouter, ReceiptReactor,
};
use crate::read_model::InMemoryTenantStore;
use crate::saga::{DispatchingExecutor, GrnDiscrepancySaga, SagaProgress, SagaRunner};
use crate::workflow::WorkflowService;

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type SharedDispatcher = Arc<CommandDispatcher<SharedStore, SharedBus>>;
pub type SharedWorkflow = WorkflowService<SharedStore, SharedBus>;
pub type StatusBoard = StatusBoardProjection<Arc<InMemoryTenantStore<AggregateId, StatusRecord>>>;

type Executor = DispatchingExecutor<SharedStore, SharedBus>;

/// What processing one envelope produced, for live subscribers.
#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub status: Option<StatusRecord>,
    pub notifications: Vec<DepartmentNotification>,
    pub saga: SagaProgress,
    pub receipt_recorded: bool,
}

pub struct EventProcessor {
    store: SharedStore,
    board: Arc<StatusBoard>,
    // Serializes board writes against tenant rebuilds.
    board_guard: Mutex<HashSet<TenantId>>,
    saga: SagaRunner<GrnDiscrepancySaga, SharedStore, Executor>,
    receipts: ReceiptReactor<Executor>,
    notifications: NotificationReactor<Arc<InMemoryNotificationSink>>,
}

impl EventProcessor {
    pub fn new(
        dispatcher: SharedDispatcher,
        board: Arc<StatusBoard>,
        router: NotificationRouter,
        sink: Arc<InMemoryNotificationSink>,
    ) -> Self {
        let store = Arc::clone(dispatcher.store());
        Self {
            saga: SagaRunner::new(Arc::clone(&store), DispatchingExecutor::new(Arc::clone(&dispatcher))),
            receipts: ReceiptReactor::new(DispatchingExecutor::new(dispatcher)),
            notifications: NotificationReactor::new(router, sink),
            board,
            board_guard: Mutex::new(HashSet::new()),
            store,
        }
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Rebuild the tenant's status board from the store the first time the tenant is
    /// seen. A fresh process over a persistent store starts with an empty board.
    pub fn ensure_warm(&self, tenant_id: TenantId) -> Result<(), StatusBoardError> {
        let mut warmed = self.board_guard.lock().map_err(|_| StatusBoardError::Poisoned)?;
        if warmed.contains(&tenant_id) {
            return Ok(());
        }
        self.board.rebuild(tenant_id, &self.store)?;
        warmed.insert(tenant_id);
        Ok(())
    }

    fn apply_to_board(&self, envelope: &EventEnvelope<JsonValue>) -> Result<Option<StatusRecord>, StatusBoardError> {
        self.ensure_warm(envelope.tenant_id())?;
        let _guard = self.board_guard.lock().map_err(|_| StatusBoardError::Poisoned)?;
        self.board.apply_envelope(envelope)
    }

    pub fn process(&self, envelope: &EventEnvelope<JsonValue>) -> Processed {
        let mut processed = Processed::default();

        match self.apply_to_board(envelope) {
            Ok(status) => processed.status = status,
            Err(e) => tracing::error!(
                event_id = %envelope.event_id(),
                aggregate_type = envelope.aggregate_type(),
                aggregate_id = %envelope.aggregate_id(),
                error = %e,
                "status board update failed"
            ),
        }

        match self.saga.handle(envelope) {
            Ok(progress) => processed.saga = progress,
            Err(e) => tracing::error!(
                event_id = %envelope.event_id(),
                aggregate_id = %envelope.aggregate_id(),
                error = %e,
                "GRN discrepancy saga failed"
            ),
        }

        match self.receipts.handle(envelope) {
            Ok(recorded) => processed.receipt_recorded = recorded,
            Err(e) => tracing::warn!(
                event_id = %envelope.event_id(),
                aggregate_id = %envelope.aggregate_id(),
                error = %e,
                "receipt could not be recorded"
            ),
        }

        processed.notifications = self.notifications.handle(envelope);
        processed
    }
}
