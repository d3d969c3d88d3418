//! Service wiring: event store, bus, dispatcher, and the worker that runs the
//! post-commit pipeline (status board, GRN discrepancy saga, PO receipts, department
//! notifications) and feeds the realtime channel.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use loomerp_core::TenantId;
use loomerp_events::{EventEnvelope, InMemoryEventBus};
use loomerp_infra::{
    command_dispatcher::CommandDispatcher,
    config::StoreBackend,
    event_store::{InMemoryEventStore, PostgresEventStore},
    pipeline::{EventProcessor, Processed, SharedBus, SharedDispatcher, SharedStore, SharedWorkflow, StatusBoard},
    projections::{StatusBoardError, StatusRecord},
    reactors::{Department, DepartmentNotification, InMemoryNotificationSink, NotificationRouter, NotificationSink},
    read_model::InMemoryTenantStore,
    workers::{EventWorker, WorkerHandle},
    workflow::WorkflowService,
};

pub const STATUS_TOPIC: &str = "document.status";
pub const NOTIFICATION_TOPIC: &str = "department.notification";

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

pub struct AppServices {
    dispatcher: SharedDispatcher,
    workflow: SharedWorkflow,
    processor: Arc<EventProcessor>,
    notifications: Arc<InMemoryNotificationSink>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    // Stops the pipeline thread when the services go away.
    _worker: WorkerHandle,
}

/// Wire the services for a store backend. Must run inside the tokio runtime.
pub async fn build_services(backend: &StoreBackend, realtime_capacity: usize) -> anyhow::Result<AppServices> {
    let store: SharedStore = match backend {
        StoreBackend::InMemory => Arc::new(InMemoryEventStore::new()),
        StoreBackend::Postgres { database_url } => {
            tracing::info!("using the Postgres event store");
            Arc::new(PostgresEventStore::connect(database_url).await?)
        }
    };
    let bus: SharedBus = Arc::new(InMemoryEventBus::new());
    let dispatcher: SharedDispatcher = Arc::new(CommandDispatcher::new(store, Arc::clone(&bus)));

    let board: Arc<StatusBoard> = Arc::new(StatusBoard::new(Arc::new(InMemoryTenantStore::new())));
    let notifications = Arc::new(InMemoryNotificationSink::new());
    let processor = Arc::new(EventProcessor::new(
        Arc::clone(&dispatcher),
        board,
        NotificationRouter::default(),
        Arc::clone(&notifications),
    ));

    let (realtime_tx, _) = broadcast::channel(realtime_capacity);

    let worker = {
        let processor = Arc::clone(&processor);
        let tx = realtime_tx.clone();
        EventWorker::spawn("event-pipeline", &bus, move |envelope: EventEnvelope<JsonValue>| {
            let processed = processor.process(&envelope);
            broadcast_processed(&tx, envelope.tenant_id(), processed);
            Ok::<(), Infallible>(())
        })?
    };

    Ok(AppServices {
        workflow: WorkflowService::new(Arc::clone(&dispatcher)),
        dispatcher,
        processor,
        notifications,
        realtime_tx,
        _worker: worker,
    })
}

// Lossy: a slow or absent SSE client never holds up the pipeline.
fn broadcast_processed(tx: &broadcast::Sender<RealtimeMessage>, tenant_id: TenantId, processed: Processed) {
    if let Some(record) = processed.status {
        if let Ok(payload) = serde_json::to_value(&record) {
            let _ = tx.send(RealtimeMessage {
                tenant_id,
                topic: STATUS_TOPIC.to_string(),
                payload,
            });
        }
    }
    for notification in processed.notifications {
        if let Ok(payload) = serde_json::to_value(&notification) {
            let _ = tx.send(RealtimeMessage {
                tenant_id,
                topic: NOTIFICATION_TOPIC.to_string(),
                payload,
            });
        }
    }
}

impl AppServices {
    pub fn dispatcher(&self) -> &CommandDispatcher<SharedStore, SharedBus> {
        &self.dispatcher
    }

    pub fn workflow(&self) -> &SharedWorkflow {
        &self.workflow
    }

    /// Status board rows of one document type, newest first.
    pub fn list_documents(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        status: Option<&str>,
    ) -> Result<Vec<StatusRecord>, StatusBoardError> {
        self.processor.ensure_warm(tenant_id)?;
        Ok(self.processor.board().list(tenant_id, aggregate_type, status))
    }

    pub fn notifications(&self, tenant_id: TenantId, department: Option<Department>) -> Vec<DepartmentNotification> {
        self.notifications.list(tenant_id, department)
    }

    pub fn subscribe_realtime(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.realtime_tx.subscribe()
    }
}

/// SSE stream of the tenant's realtime messages.
pub fn tenant_sse_stream(
    services: &AppServices,
    tenant_id: TenantId,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let stream = BroadcastStream::new(services.subscribe_realtime()).filter_map(move |msg| match msg {
        Ok(msg) if msg.tenant_id == tenant_id => {
            let data = serde_json::to_string(&msg.payload).ok()?;
            Some(Ok(SseEvent::default().event(msg.topic).data(data)))
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "realtime subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
