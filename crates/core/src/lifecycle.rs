//! Status lifecycles: static allowed-transition tables and the guard that enforces them.
//!
//! Every business document (purchase order, GRN, credit note, shipment, ...) carries a
//! `status` from a fixed enumeration. Which statuses may follow which is declared once
//! per entity type as a [`StatusLifecycle`] table. Aggregates embed a [`StatusTracker`]
//! and route every status change request through [`StatusTracker::decide`], so the
//! table is enforced on the write path rather than by whoever renders the buttons.

use core::fmt::{Debug, Display};
use core::hash::Hash;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::id::{AggregateId, TenantId, UserId};

/// Wildcard grant: an actor holding it may perform any transition.
pub const WILDCARD_PERMISSION: &str = "*";

/// A status enumeration with a static lifecycle table.
///
/// Implement with [`lifecycle_status!`](crate::lifecycle_status) rather than by hand.
pub trait LifecycleStatus:
    Copy
    + Eq
    + Hash
    + Debug
    + Display
    + FromStr<Err = DomainError>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Every declared status, in lifecycle order.
    const ALL: &'static [Self];

    /// Stable snake_case wire name.
    fn as_str(&self) -> &'static str;

    /// The entity's allowed-transition table.
    fn lifecycle() -> &'static StatusLifecycle<Self>;
}

/// One allowed edge of a lifecycle, plus the permission needed to walk it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition<S: 'static> {
    pub from: S,
    pub to: S,
    pub permission: &'static str,
}

impl<S> Transition<S> {
    pub const fn new(from: S, to: S, permission: &'static str) -> Self {
        Self {
            from,
            to,
            permission,
        }
    }
}

/// Static allowed-transition table for one entity type.
#[derive(Debug)]
pub struct StatusLifecycle<S: 'static> {
    entity: &'static str,
    initial: S,
    transitions: &'static [Transition<S>],
}

impl<S> StatusLifecycle<S> {
    pub const fn new(entity: &'static str, initial: S, transitions: &'static [Transition<S>]) -> Self {
        Self {
            entity,
            initial,
            transitions,
        }
    }

    /// Aggregate type this lifecycle belongs to (e.g. `purchasing.order`).
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn transitions(&self) -> &'static [Transition<S>] {
        self.transitions
    }
}

impl<S: LifecycleStatus> StatusLifecycle<S> {
    /// Status every new entity starts in.
    pub fn initial(&self) -> S {
        self.initial
    }

    /// Look up the edge `from -> to`, if declared.
    pub fn transition(&self, from: S, to: S) -> Option<&'static Transition<S>> {
        self.transitions.iter().find(|t| t.from == from && t.to == to)
    }

    /// Pure lookup. Anything not declared in the table is refused.
    pub fn is_transition_allowed(&self, from: S, to: S) -> bool {
        self.transition(from, to).is_some()
    }

    pub fn allowed_targets(&self, from: S) -> Vec<S> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }

    /// Targets reachable from `from` that `actor` holds the permission for.
    pub fn allowed_targets_for(&self, from: S, actor: &Actor) -> Vec<S> {
        self.transitions
            .iter()
            .filter(|t| t.from == from && actor.can(t.permission))
            .map(|t| t.to)
            .collect()
    }

    /// A status with no outgoing edges.
    pub fn is_terminal(&self, status: S) -> bool {
        !self.transitions.iter().any(|t| t.from == status)
    }

    /// Like [`Self::is_transition_allowed`] but with a descriptive error.
    pub fn check(&self, from: S, to: S) -> DomainResult<&'static Transition<S>> {
        self.transition(from, to)
            .ok_or_else(|| DomainError::invalid_transition(self.entity, from.as_str(), to.as_str()))
    }

    /// Table check followed by the edge's permission check.
    pub fn authorize(&self, from: S, to: S, actor: &Actor) -> DomainResult<&'static Transition<S>> {
        let edge = self.check(from, to)?;
        if !actor.can(edge.permission) {
            return Err(DomainError::unauthorized(format!(
                "moving {} from '{}' to '{}' requires '{}'",
                self.entity, from, to, edge.permission
            )));
        }
        Ok(edge)
    }

    /// Serializable view of the table (for clients deciding which actions to offer).
    pub fn describe(&self) -> LifecycleTable {
        LifecycleTable {
            entity: self.entity,
            initial: self.initial.as_str(),
            statuses: S::ALL.iter().map(|s| s.as_str()).collect(),
            terminal: S::ALL
                .iter()
                .filter(|s| self.is_terminal(**s))
                .map(|s| s.as_str())
                .collect(),
            transitions: self
                .transitions
                .iter()
                .map(|t| TransitionRow {
                    from: t.from.as_str(),
                    to: t.to.as_str(),
                    permission: t.permission,
                })
                .collect(),
        }
    }
}

/// Typed form of the guard's lookup.
pub fn is_transition_allowed<S: LifecycleStatus>(
    current: S,
    target: S,
    lifecycle: &StatusLifecycle<S>,
) -> bool {
    lifecycle.is_transition_allowed(current, target)
}

/// Wire form of the guard's lookup. Unknown status names are refused.
pub fn is_transition_allowed_str<S: LifecycleStatus>(
    current: &str,
    target: &str,
    lifecycle: &StatusLifecycle<S>,
) -> bool {
    match (current.parse::<S>(), target.parse::<S>()) {
        (Ok(current), Ok(target)) => lifecycle.is_transition_allowed(current, target),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleTable {
    pub entity: &'static str,
    pub initial: &'static str,
    pub statuses: Vec<&'static str>,
    pub terminal: Vec<&'static str>,
    pub transitions: Vec<TransitionRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRow {
    pub from: &'static str,
    pub to: &'static str,
    pub permission: &'static str,
}

/// Who is performing a status change, with the permissions resolved for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    id: UserId,
    grants: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, P>(id: UserId, grants: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            id,
            grants: grants.into_iter().map(Into::into).collect(),
        }
    }

    /// Internal actor for follow-up processing (receipts, derived documents).
    pub fn system() -> Self {
        Self::new(UserId::system(), [WILDCARD_PERMISSION])
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn is_system(&self) -> bool {
        self.id.is_system()
    }

    pub fn can(&self, permission: &str) -> bool {
        self.grants.contains(WILDCARD_PERMISSION) || self.grants.contains(permission)
    }
}

/// A request to move an entity to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest<S> {
    pub target: S,
    pub actor: Actor,
    pub reason: Option<String>,
    /// Client-supplied idempotency key. Replaying a request id is a no-op.
    pub request_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl<S> TransitionRequest<S> {
    pub fn new(target: S, actor: Actor, occurred_at: DateTime<Utc>) -> Self {
        Self {
            target,
            actor,
            reason: None,
            request_id: None,
            occurred_at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Command payload shared by every lifecycle aggregate: move `entity_id` to a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus<S> {
    pub tenant_id: TenantId,
    pub entity_id: AggregateId,
    pub request: TransitionRequest<S>,
}

/// Fact: an entity's status moved along a declared edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange<S> {
    pub tenant_id: TenantId,
    pub entity_id: AggregateId,
    pub from: S,
    pub to: S,
    pub actor: UserId,
    pub reason: Option<String>,
    pub request_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// One row of an entity's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStamp<S> {
    pub from: S,
    pub to: S,
    pub actor: UserId,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Status state embedded in every lifecycle aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTracker<S: LifecycleStatus> {
    status: S,
    history: Vec<StatusStamp<S>>,
    #[serde(skip)]
    applied_requests: BTreeMap<Uuid, S>,
}

impl<S: LifecycleStatus> Default for StatusTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LifecycleStatus> StatusTracker<S> {
    pub fn new() -> Self {
        Self {
            status: S::lifecycle().initial(),
            history: Vec::new(),
            applied_requests: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> S {
        self.status
    }

    pub fn history(&self) -> &[StatusStamp<S>] {
        &self.history
    }

    pub fn last_change(&self) -> Option<&StatusStamp<S>> {
        self.history.last()
    }

    pub fn is_terminal(&self) -> bool {
        S::lifecycle().is_terminal(self.status)
    }

    /// Decide a transition request against the current status.
    ///
    /// - a request id that was already applied with the same target → `Ok(None)`
    /// - a request id reused for a different target → `Conflict`
    /// - an edge missing from the table (including `target == current`) → `InvalidTransition`
    /// - an actor without the edge's permission → `Unauthorized`
    /// - otherwise exactly one `StatusChange`
    pub fn decide(
        &self,
        tenant_id: TenantId,
        entity_id: AggregateId,
        request: &TransitionRequest<S>,
    ) -> DomainResult<Option<StatusChange<S>>> {
        if let Some(request_id) = request.request_id {
            if let Some(applied_target) = self.applied_requests.get(&request_id) {
                if *applied_target == request.target {
                    return Ok(None);
                }
                return Err(DomainError::conflict(format!(
                    "request {request_id} was already used to move to '{applied_target}'"
                )));
            }
        }

        S::lifecycle().authorize(self.status, request.target, &request.actor)?;

        Ok(Some(StatusChange {
            tenant_id,
            entity_id,
            from: self.status,
            to: request.target,
            actor: request.actor.id(),
            reason: request.reason.clone(),
            request_id: request.request_id,
            occurred_at: request.occurred_at,
        }))
    }

    pub fn apply(&mut self, change: &StatusChange<S>) {
        self.status = change.to;
        if let Some(request_id) = change.request_id {
            self.applied_requests.insert(request_id, change.to);
        }
        self.history.push(StatusStamp {
            from: change.from,
            to: change.to,
            actor: change.actor,
            reason: change.reason.clone(),
            at: change.occurred_at,
        });
    }
}

/// Declare a status enum and bind it to its lifecycle table.
///
/// ```ignore
/// const TRANSITIONS: &[Transition<JobStatus>] =
///     &[Transition::new(JobStatus::Queued, JobStatus::Done, "jobs.finish")];
///
/// static LIFECYCLE: StatusLifecycle<JobStatus> =
///     StatusLifecycle::new("jobs.job", JobStatus::Queued, TRANSITIONS);
///
/// lifecycle_status! {
///     pub enum JobStatus: LIFECYCLE {
///         Queued = "queued",
///         Done = "done",
///     }
/// }
/// ```
#[macro_export]
macro_rules! lifecycle_status {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $lifecycle:path {
            $( $(#[$vmeta:meta])* $variant:ident = $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $crate::lifecycle::LifecycleStatus for $name {
            const ALL: &'static [Self] = &[$( $name::$variant ),+];

            fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }

            fn lifecycle() -> &'static $crate::lifecycle::StatusLifecycle<Self> {
                &$lifecycle
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str($crate::lifecycle::LifecycleStatus::as_str(self))
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok($name::$variant), )+
                    other => Err($crate::DomainError::validation(format!(
                        "unknown {} status '{}'",
                        <$name as $crate::lifecycle::LifecycleStatus>::lifecycle().entity(),
                        other
                    ))),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TICKET_TRANSITIONS: &[Transition<TicketStatus>] = {
        use TicketStatus::*;
        &[
            Transition::new(Open, Review, "tickets.submit"),
            Transition::new(Review, Done, "tickets.approve"),
            Transition::new(Review, Open, "tickets.approve"),
            Transition::new(Open, Dropped, "tickets.drop"),
        ]
    };

    static TICKET_LIFECYCLE: StatusLifecycle<TicketStatus> =
        StatusLifecycle::new("test.ticket", TicketStatus::Open, TICKET_TRANSITIONS);

    crate::lifecycle_status! {
        enum TicketStatus: TICKET_LIFECYCLE {
            Open = "open",
            Review = "review",
            Done = "done",
            Dropped = "dropped",
        }
    }

    fn clerk() -> Actor {
        Actor::new(UserId::new(), ["tickets.submit", "tickets.drop"])
    }

    fn request(target: TicketStatus, actor: Actor) -> TransitionRequest<TicketStatus> {
        TransitionRequest::new(target, actor, Utc::now())
    }

    fn advance(tracker: &mut StatusTracker<TicketStatus>, req: &TransitionRequest<TicketStatus>) -> DomainResult<bool> {
        match tracker.decide(TenantId::new(), AggregateId::new(), req)? {
            Some(change) => {
                tracker.apply(&change);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[test]
    fn wire_names_round_trip_through_serde_and_from_str() {
        assert_eq!(serde_json::to_string(&TicketStatus::Review).unwrap(), "\"review\"");
        assert_eq!("dropped".parse::<TicketStatus>().unwrap(), TicketStatus::Dropped);
        assert!(matches!(
            "archived".parse::<TicketStatus>(),
            Err(DomainError::Validation(msg)) if msg.contains("test.ticket")
        ));
    }

    #[test]
    fn lookup_fails_closed_for_unknown_statuses() {
        assert!(is_transition_allowed_str("open", "review", &TICKET_LIFECYCLE));
        assert!(!is_transition_allowed_str("open", "done", &TICKET_LIFECYCLE));
        assert!(!is_transition_allowed_str("archived", "open", &TICKET_LIFECYCLE));
        assert!(!is_transition_allowed_str("open", "", &TICKET_LIFECYCLE));
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        assert!(TICKET_LIFECYCLE.is_terminal(TicketStatus::Done));
        assert!(TICKET_LIFECYCLE.is_terminal(TicketStatus::Dropped));
        assert!(!TICKET_LIFECYCLE.is_terminal(TicketStatus::Review));

        let table = TICKET_LIFECYCLE.describe();
        assert_eq!(table.initial, "open");
        assert_eq!(table.terminal, vec!["done", "dropped"]);
        assert_eq!(table.transitions.len(), 4);
    }

    #[test]
    fn allowed_targets_respect_actor_grants() {
        let targets = TICKET_LIFECYCLE.allowed_targets_for(TicketStatus::Review, &clerk());
        assert!(targets.is_empty());

        let all = TICKET_LIFECYCLE.allowed_targets_for(TicketStatus::Review, &Actor::system());
        assert_eq!(all, vec![TicketStatus::Done, TicketStatus::Open]);
    }

    #[test]
    fn undeclared_edge_is_rejected_without_mutation() {
        let mut tracker = StatusTracker::<TicketStatus>::new();
        let err = advance(&mut tracker, &request(TicketStatus::Done, Actor::system())).unwrap_err();

        assert_eq!(
            err,
            DomainError::invalid_transition("test.ticket", "open", "done")
        );
        assert_eq!(tracker.status(), TicketStatus::Open);
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn missing_permission_is_unauthorized() {
        let mut tracker = StatusTracker::<TicketStatus>::new();
        assert!(advance(&mut tracker, &request(TicketStatus::Review, clerk())).unwrap());

        let err = advance(&mut tracker, &request(TicketStatus::Done, clerk())).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(msg) if msg.contains("tickets.approve")));
        assert_eq!(tracker.status(), TicketStatus::Review);
    }

    #[test]
    fn same_status_without_request_id_is_rejected() {
        let mut tracker = StatusTracker::<TicketStatus>::new();
        assert!(advance(&mut tracker, &request(TicketStatus::Review, clerk())).unwrap());

        let err = advance(&mut tracker, &request(TicketStatus::Review, clerk())).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn replayed_request_id_is_a_no_op() {
        let mut tracker = StatusTracker::<TicketStatus>::new();
        let id = Uuid::now_v7();
        let req = request(TicketStatus::Review, clerk()).with_request_id(id);

        assert!(advance(&mut tracker, &req).unwrap());
        assert!(!advance(&mut tracker, &req).unwrap());
        assert_eq!(tracker.history().len(), 1);

        let reused = request(TicketStatus::Dropped, clerk()).with_request_id(id);
        assert!(matches!(
            advance(&mut tracker, &reused),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn apply_stamps_actor_and_time() {
        let mut tracker = StatusTracker::<TicketStatus>::new();
        let actor = clerk();
        let req = request(TicketStatus::Review, actor.clone()).with_reason("ready");
        advance(&mut tracker, &req).unwrap();

        let stamp = tracker.last_change().unwrap();
        assert_eq!(stamp.actor, actor.id());
        assert_eq!(stamp.at, req.occurred_at);
        assert_eq!(stamp.reason.as_deref(), Some("ready"));
    }

    fn any_status() -> impl Strategy<Value = TicketStatus> {
        prop::sample::select(TicketStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every undeclared (current, target) pair is refused by both lookups.
        #[test]
        fn undeclared_pairs_are_refused(from in any_status(), to in any_status()) {
            let declared = TICKET_LIFECYCLE
                .transitions()
                .iter()
                .any(|t| t.from == from && t.to == to);

            prop_assert_eq!(is_transition_allowed(from, to, &TICKET_LIFECYCLE), declared);
            prop_assert_eq!(
                is_transition_allowed_str(from.as_str(), to.as_str(), &TICKET_LIFECYCLE),
                declared
            );
        }

        /// Property: after any sequence of requests, the status is a declared member and
        /// every recorded change walked a declared edge; rejected requests change nothing.
        #[test]
        fn random_requests_only_walk_declared_edges(
            targets in prop::collection::vec(any_status(), 0..32)
        ) {
            let mut tracker = StatusTracker::<TicketStatus>::new();
            for target in targets {
                let before = tracker.status();
                match advance(&mut tracker, &request(target, Actor::system())) {
                    Ok(_) => prop_assert!(TICKET_LIFECYCLE.is_transition_allowed(before, tracker.status())),
                    Err(_) => prop_assert_eq!(tracker.status(), before),
                }
                prop_assert!(TicketStatus::ALL.contains(&tracker.status()));
            }
            for stamp in tracker.history() {
                prop_assert!(TICKET_LIFECYCLE.is_transition_allowed(stamp.from, stamp.to));
            }
        }
    }
}
