//! End-to-end processing over the in-memory store and bus:
//! command → store → bus → status board, GRN discrepancy saga, receipts, notifications.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;

use loomerp_core::{Actor, AggregateId, LifecycleAggregate, TenantId, UserId};
use loomerp_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use loomerp_finance::{DebitNote, DebitNoteStatus, Money};
use loomerp_purchasing::{
    AddLine, CreateGrn, CreatePurchaseOrder, ExpectedLine, GoodsReceiptNote, GrnCommand, GrnStatus,
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderStatus, RecordReceivedQuantity, ReturnReason,
    VendorReturn, VendorReturnStatus, GRN_INSPECTED_EVENT,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::pipeline::{EventProcessor, Processed, SharedBus, SharedDispatcher, SharedStore, SharedWorkflow};
use crate::reactors::{Department, InMemoryNotificationSink, NotificationRouter, NotificationSink};
use crate::read_model::InMemoryTenantStore;
use crate::saga::grn_discrepancy::{debit_note_id, vendor_return_id};
use crate::projections::StatusBoardProjection;
use crate::workers::EventWorker;
use crate::workflow::WorkflowService;

const UNIT_PRICE: u64 = 350;

struct Harness {
    bus: SharedBus,
    dispatcher: SharedDispatcher,
    workflow: SharedWorkflow,
    processor: Arc<EventProcessor>,
    sink: Arc<InMemoryNotificationSink>,
    sub: Subscription<EventEnvelope<JsonValue>>,
}

impl Harness {
    fn new() -> Self {
        let store: SharedStore = Arc::new(InMemoryEventStore::new());
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let dispatcher: SharedDispatcher = Arc::new(CommandDispatcher::new(store, Arc::clone(&bus)));
        let sink = Arc::new(InMemoryNotificationSink::new());
        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&dispatcher),
            Arc::new(StatusBoardProjection::new(Arc::new(InMemoryTenantStore::new()))),
            NotificationRouter::default(),
            Arc::clone(&sink),
        ));
        Self {
            bus,
            workflow: WorkflowService::new(Arc::clone(&dispatcher)),
            dispatcher,
            processor,
            sink,
            sub,
        }
    }

    /// Process everything published so far, including what processing publishes.
    fn pump(&self) -> Vec<Processed> {
        let mut processed = Vec::new();
        loop {
            let batch = self.sub.drain();
            if batch.is_empty() {
                return processed;
            }
            processed.extend(batch.iter().map(|env| self.processor.process(env)));
        }
    }

    fn sent_order(&self, tenant_id: TenantId, quantity: u32) -> AggregateId {
        let order_id = AggregateId::new();
        let create = PurchaseOrderCommand::Create(CreatePurchaseOrder {
            tenant_id,
            order_id,
            reference: "PO-2024-0500".to_string(),
            vendor_code: "V-DENIM-01".to_string(),
            lines: vec![],
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        });
        let line = PurchaseOrderCommand::AddLine(AddLine {
            tenant_id,
            order_id,
            material_code: "DENIM-12OZ-IND".to_string(),
            quantity,
            unit_price: Money::from_minor(UNIT_PRICE),
            occurred_at: Utc::now(),
        });
        for cmd in [create, line] {
            self.dispatcher.execute::<PurchaseOrder>(tenant_id, order_id, cmd, None).unwrap();
        }
        for target in [
            PurchaseOrderStatus::PendingApproval,
            PurchaseOrderStatus::Approved,
            PurchaseOrderStatus::Sent,
        ] {
            self.workflow
                .transition_now::<PurchaseOrder>(tenant_id, order_id, target, Actor::system())
                .unwrap();
        }
        order_id
    }

    fn submitted_grn(&self, tenant_id: TenantId, order_id: AggregateId, ordered: u32, received: u32, rejected: u32) -> AggregateId {
        let grn_id = AggregateId::new();
        let create = GrnCommand::Create(CreateGrn {
            tenant_id,
            grn_id,
            reference: format!("GRN-{}", &grn_id.to_string()[..8]),
            purchase_order_id: order_id,
            vendor_code: "V-DENIM-01".to_string(),
            lines: vec![ExpectedLine {
                po_line_no: 1,
                material_code: "DENIM-12OZ-IND".to_string(),
                ordered,
                unit_price: Money::from_minor(UNIT_PRICE),
            }],
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        });
        let quantities = GrnCommand::RecordReceivedQuantity(RecordReceivedQuantity {
            tenant_id,
            grn_id,
            line_no: 1,
            received,
            rejected,
            occurred_at: Utc::now(),
        });
        for cmd in [create, quantities] {
            self.dispatcher.execute::<GoodsReceiptNote>(tenant_id, grn_id, cmd, None).unwrap();
        }
        self.workflow
            .transition_now::<GoodsReceiptNote>(tenant_id, grn_id, GrnStatus::Submitted, Actor::system())
            .unwrap();
        grn_id
    }

    fn inspect(&self, tenant_id: TenantId, grn_id: AggregateId, outcome: GrnStatus) {
        let inspector = Actor::new(UserId::new(), ["purchases.grn.inspect"]);
        self.workflow
            .transition_now::<GoodsReceiptNote>(tenant_id, grn_id, outcome, inspector)
            .unwrap();
    }

    fn inspection_envelope(&self, tenant_id: TenantId, grn_id: AggregateId) -> EventEnvelope<JsonValue> {
        self.dispatcher
            .store()
            .load_stream(tenant_id, grn_id)
            .unwrap()
            .into_iter()
            .find(|e| e.event_type == GRN_INSPECTED_EVENT)
            .map(|e| e.to_envelope())
            .unwrap()
    }

    fn order(&self, tenant_id: TenantId, order_id: AggregateId) -> PurchaseOrder {
        self.dispatcher.load_existing::<PurchaseOrder>(tenant_id, order_id).unwrap()
    }
}

#[test]
fn shortage_raises_one_vendor_return_and_one_debit_note() {
    let h = Harness::new();
    let tenant_id = TenantId::new();
    let order_id = h.sent_order(tenant_id, 100);
    let grn_id = h.submitted_grn(tenant_id, order_id, 100, 70, 10);
    h.inspect(tenant_id, grn_id, GrnStatus::Shortage);
    h.pump();

    let vr = h
        .dispatcher
        .load_existing::<VendorReturn>(tenant_id, vendor_return_id(grn_id))
        .unwrap();
    assert_eq!(vr.status(), VendorReturnStatus::Pending);
    assert_eq!(vr.lines().len(), 1);
    assert_eq!(vr.lines()[0].quantity, 40);
    assert_eq!(vr.lines()[0].reason, ReturnReason::Shortage);

    let dn = h
        .dispatcher
        .load_existing::<DebitNote>(tenant_id, debit_note_id(grn_id))
        .unwrap();
    assert_eq!(dn.status(), DebitNoteStatus::Raised);
    assert_eq!(dn.grn_id(), Some(grn_id));
    assert_eq!(dn.amount(), Money::from_minor(40 * UNIT_PRICE));

    let board = h.processor.board();
    assert_eq!(board.list(tenant_id, "purchasing.vendor_return", None).len(), 1);
    assert_eq!(board.list(tenant_id, "finance.debit_note", Some("raised")).len(), 1);
}

#[test]
fn redelivered_inspections_create_nothing_new() {
    let h = Harness::new();
    let tenant_id = TenantId::new();
    let order_id = h.sent_order(tenant_id, 100);
    let grn_id = h.submitted_grn(tenant_id, order_id, 100, 50, 0);
    h.pump();
    h.inspect(tenant_id, grn_id, GrnStatus::Shortage);

    // First delivery of the inspection arrives on several workers at once.
    let inspection = h.inspection_envelope(tenant_id, grn_id);
    let processor = &h.processor;
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| processor.process(&inspection));
        }
    });
    h.pump();

    let vr_stream = h.dispatcher.store().load_stream(tenant_id, vendor_return_id(grn_id)).unwrap();
    let dn_stream = h.dispatcher.store().load_stream(tenant_id, debit_note_id(grn_id)).unwrap();
    assert_eq!(vr_stream.len(), 1);
    assert_eq!(dn_stream.len(), 1);

    let again = h.processor.process(&inspection);
    assert_eq!(again.saga.commands_executed, 0);
    assert!(again.notifications.is_empty());
    h.pump();

    assert_eq!(h.dispatcher.store().load_stream(tenant_id, vendor_return_id(grn_id)).unwrap().len(), 1);
    assert_eq!(h.dispatcher.store().load_stream(tenant_id, debit_note_id(grn_id)).unwrap().len(), 1);
    assert_eq!(h.order(tenant_id, order_id).receipts().len(), 1);
    assert_eq!(h.order(tenant_id, order_id).lines()[0].received, 50);
}

#[test]
fn excess_raises_only_a_vendor_return_and_accepted_raises_nothing() {
    let h = Harness::new();
    let tenant_id = TenantId::new();

    let order_id = h.sent_order(tenant_id, 20);
    let excess = h.submitted_grn(tenant_id, order_id, 20, 25, 0);
    h.inspect(tenant_id, excess, GrnStatus::Excess);
    h.pump();

    let vr = h
        .dispatcher
        .load_existing::<VendorReturn>(tenant_id, vendor_return_id(excess))
        .unwrap();
    assert_eq!(vr.lines()[0].quantity, 5);
    assert_eq!(vr.lines()[0].reason, ReturnReason::Excess);
    assert!(h.dispatcher.load_existing::<DebitNote>(tenant_id, debit_note_id(excess)).is_err());
    // Excess never over-receives the order.
    assert_eq!(h.order(tenant_id, order_id).status(), PurchaseOrderStatus::Received);

    let other_order = h.sent_order(tenant_id, 20);
    let clean = h.submitted_grn(tenant_id, other_order, 20, 20, 0);
    h.inspect(tenant_id, clean, GrnStatus::Accepted);
    h.pump();
    assert!(h.dispatcher.load_existing::<VendorReturn>(tenant_id, vendor_return_id(clean)).is_err());
    assert_eq!(h.processor.board().list(tenant_id, "purchasing.vendor_return", None).len(), 1);
}

#[test]
fn receipts_move_the_order_through_partial_to_full() {
    let h = Harness::new();
    let tenant_id = TenantId::new();
    let order_id = h.sent_order(tenant_id, 100);

    let first = h.submitted_grn(tenant_id, order_id, 100, 60, 0);
    h.inspect(tenant_id, first, GrnStatus::Shortage);
    h.pump();
    let order = h.order(tenant_id, order_id);
    assert_eq!(order.status(), PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(order.lines()[0].outstanding(), 40);

    let second = h.submitted_grn(tenant_id, order_id, 40, 40, 0);
    h.inspect(tenant_id, second, GrnStatus::Accepted);
    h.pump();
    let order = h.order(tenant_id, order_id);
    assert_eq!(order.status(), PurchaseOrderStatus::Received);
    assert_eq!(order.receipts().len(), 2);

    let record = h.processor.board().get(tenant_id, &order_id).unwrap();
    assert_eq!(record.status, "received");
    let path: Vec<&str> = record.history.iter().map(|s| s.to.as_str()).collect();
    assert_eq!(
        path,
        vec!["pending_approval", "approved", "sent", "partially_received", "received"]
    );
}

#[test]
fn departments_are_notified_of_routed_changes() {
    let h = Harness::new();
    let tenant_id = TenantId::new();
    let order_id = h.sent_order(tenant_id, 10);
    let grn_id = h.submitted_grn(tenant_id, order_id, 10, 8, 0);
    h.inspect(tenant_id, grn_id, GrnStatus::Shortage);
    h.pump();

    let of = |d: Department| h.sink.list(tenant_id, Some(d));
    assert_eq!(of(Department::PurchaseManagement).len(), 1);
    assert_eq!(of(Department::Vendor).len(), 1);
    assert_eq!(of(Department::Accounts).len(), 1);
    assert_eq!(of(Department::Purchase)[0].aggregate_id, grn_id);
    assert!(of(Department::Stores).is_empty());
    assert!(h.sink.list(TenantId::new(), None).is_empty());
}

#[test]
fn tenants_never_see_each_other() {
    let h = Harness::new();
    let (a, b) = (TenantId::new(), TenantId::new());
    let order_id = h.sent_order(a, 10);
    h.pump();

    assert_eq!(h.processor.board().list(a, PurchaseOrder::aggregate_type(), None).len(), 1);
    assert!(h.processor.board().list(b, PurchaseOrder::aggregate_type(), None).is_empty());
    assert!(h.dispatcher.load_existing::<PurchaseOrder>(b, order_id).is_err());
}

#[test]
fn background_worker_drives_the_whole_flow() {
    let h = Harness::new();
    let processor = Arc::clone(&h.processor);
    let worker = EventWorker::spawn("pipeline-test", &h.bus, move |env: EventEnvelope<JsonValue>| {
        processor.process(&env);
        Ok::<(), String>(())
    })
    .unwrap();

    let tenant_id = TenantId::new();
    let order_id = h.sent_order(tenant_id, 30);
    let grn_id = h.submitted_grn(tenant_id, order_id, 30, 10, 0);
    h.inspect(tenant_id, grn_id, GrnStatus::Shortage);

    let deadline = Instant::now() + Duration::from_secs(5);
    let raised = loop {
        let board = h.processor.board();
        let done = board.get(tenant_id, &debit_note_id(grn_id)).is_some()
            && board.get(tenant_id, &order_id).is_some_and(|r| r.status == "partially_received");
        if done || Instant::now() > deadline {
            break done;
        }
        thread::sleep(Duration::from_millis(20));
    };
    worker.shutdown();

    assert!(raised, "debit note and receipt were not processed in time");
}
