//! Department notifications for status changes other teams have to act on.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use loomerp_core::{AggregateId, TenantId};
use loomerp_events::{status_change, EventEnvelope};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    PurchaseManagement,
    Purchase,
    Vendor,
    Accounts,
    Stores,
    Sales,
}

impl Department {
    pub fn as_str(self) -> &'static str {
        match self {
            Department::PurchaseManagement => "purchase_management",
            Department::Purchase => "purchase",
            Department::Vendor => "vendor",
            Department::Accounts => "accounts",
            Department::Stores => "stores",
            Department::Sales => "sales",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Department::PurchaseManagement,
            Department::Purchase,
            Department::Vendor,
            Department::Accounts,
            Department::Stores,
            Department::Sales,
        ]
        .into_iter()
        .find(|d| d.as_str() == s)
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentNotification {
    /// Event the notification was raised for.
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub department: Department,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRoute {
    pub aggregate_type: &'static str,
    pub status: &'static str,
    pub departments: &'static [Department],
    pub headline: &'static str,
}

const DEFAULT_ROUTES: &[NotificationRoute] = &[
    NotificationRoute {
        aggregate_type: "purchasing.order",
        status: "pending_approval",
        departments: &[Department::PurchaseManagement],
        headline: "Purchase order awaiting approval",
    },
    NotificationRoute {
        aggregate_type: "purchasing.order",
        status: "sent",
        departments: &[Department::Vendor],
        headline: "Purchase order sent to vendor",
    },
    NotificationRoute {
        aggregate_type: "purchasing.grn",
        status: "shortage",
        departments: &[Department::Accounts, Department::Purchase],
        headline: "GRN inspected with shortage",
    },
    NotificationRoute {
        aggregate_type: "purchasing.grn",
        status: "excess",
        departments: &[Department::Accounts, Department::Purchase],
        headline: "GRN inspected with excess",
    },
    NotificationRoute {
        aggregate_type: "finance.credit_note",
        status: "issued",
        departments: &[Department::Accounts],
        headline: "Credit note issued",
    },
    NotificationRoute {
        aggregate_type: "inventory.material_request",
        status: "approved",
        departments: &[Department::Stores],
        headline: "Material request approved for issue",
    },
    NotificationRoute {
        aggregate_type: "inventory.material_return",
        status: "approved",
        departments: &[Department::Stores],
        headline: "Material return approved for receipt",
    },
    NotificationRoute {
        aggregate_type: "shipping.shipment",
        status: "dispatched",
        departments: &[Department::Sales],
        headline: "Shipment dispatched",
    },
];

/// Maps `(aggregate type, new status)` to the departments that hear about it.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    routes: Vec<NotificationRoute>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTES.to_vec())
    }
}

impl NotificationRouter {
    pub fn new(routes: Vec<NotificationRoute>) -> Self {
        Self { routes }
    }

    pub fn route(&self, aggregate_type: &str, status: &str) -> Option<&NotificationRoute> {
        self.routes
            .iter()
            .find(|r| r.aggregate_type == aggregate_type && r.status == status)
    }

    pub fn routes(&self) -> &[NotificationRoute] {
        &self.routes
    }
}

/// Where notifications end up. `record` returns false for a notification already held
/// for the same event and department.
pub trait NotificationSink: Send + Sync {
    fn record(&self, notification: DepartmentNotification) -> bool;
    /// Newest first.
    fn list(&self, tenant_id: TenantId, department: Option<Department>) -> Vec<DepartmentNotification>;
}

impl<N: NotificationSink + ?Sized> NotificationSink for Arc<N> {
    fn record(&self, notification: DepartmentNotification) -> bool {
        (**self).record(notification)
    }

    fn list(&self, tenant_id: TenantId, department: Option<Department>) -> Vec<DepartmentNotification> {
        (**self).list(tenant_id, department)
    }
}

#[derive(Debug, Default)]
struct TenantInbox {
    seen: HashSet<(Uuid, Department)>,
    notifications: Vec<DepartmentNotification>,
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    inboxes: RwLock<HashMap<TenantId, TenantInbox>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn record(&self, notification: DepartmentNotification) -> bool {
        let Ok(mut inboxes) = self.inboxes.write() else {
            return false;
        };
        let inbox = inboxes.entry(notification.tenant_id).or_default();
        if !inbox.seen.insert((notification.event_id, notification.department)) {
            return false;
        }
        inbox.notifications.push(notification);
        true
    }

    fn list(&self, tenant_id: TenantId, department: Option<Department>) -> Vec<DepartmentNotification> {
        let Ok(inboxes) = self.inboxes.read() else {
            return vec![];
        };
        let Some(inbox) = inboxes.get(&tenant_id) else {
            return vec![];
        };
        inbox
            .notifications
            .iter()
            .rev()
            .filter(|n| department.map_or(true, |d| n.department == d))
            .cloned()
            .collect()
    }
}

pub struct NotificationReactor<N> {
    router: NotificationRouter,
    sink: N,
}

impl<N: NotificationSink> NotificationReactor<N> {
    pub fn new(router: NotificationRouter, sink: N) -> Self {
        Self { router, sink }
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    /// Notifications newly recorded for this envelope.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Vec<DepartmentNotification> {
        let Some(change) = status_change(envelope) else {
            return vec![];
        };
        let Some(route) = self.router.route(envelope.aggregate_type(), &change.to) else {
            return vec![];
        };

        let mut recorded = Vec::new();
        for department in route.departments {
            let notification = DepartmentNotification {
                event_id: envelope.event_id(),
                tenant_id: envelope.tenant_id(),
                department: *department,
                aggregate_type: envelope.aggregate_type().to_string(),
                aggregate_id: envelope.aggregate_id(),
                status: change.to.clone(),
                message: format!("{} ({})", route.headline, envelope.aggregate_id()),
                created_at: change.occurred_at,
            };
            if self.sink.record(notification.clone()) {
                tracing::info!(
                    tenant_id = %notification.tenant_id,
                    aggregate_type = %notification.aggregate_type,
                    aggregate_id = %notification.aggregate_id,
                    to = %notification.status,
                    department = %notification.department,
                    "department notified"
                );
                recorded.push(notification);
            }
        }
        recorded
    }
}
