//! Ingestion of normalized payment-provider notifications.
//!
//! Deliveries are at-least-once and unordered, so the processor is idempotent by construction:
//! status only ever moves along the promote-only payment edges, `paid_at` is set once, and a
//! provider reference never clobbers another provider reference. Re-applying an event is a no-op
//! on the order row.

use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    db_types::{
        Actor,
        AuditAction,
        EntityType,
        EventOutcome,
        MappedStatus,
        NewAuditEntry,
        Order,
        OrderId,
        OrderStatus,
        PaymentEvent,
        Role,
    },
    api::errors::WorkflowError,
    state_machine,
    traits::SettlementDatabase,
};

/// The actor recorded against automated webhook ingestion.
pub fn system_actor() -> Actor {
    Actor::new("payment-provider", Role::System)
}

/// What a payment event should do to the order row. Computed purely so the rules can be tested
/// without storage; the backend evaluates this inside its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPlan {
    pub previous_status: OrderStatus,
    pub next_status: OrderStatus,
    pub set_paid_at: bool,
    pub new_payment_reference: Option<String>,
}

impl EventPlan {
    pub fn dirty(&self) -> bool {
        self.next_status != self.previous_status || self.set_paid_at || self.new_payment_reference.is_some()
    }
}

/// Evaluates the promote-only rules for a single event against the current order row.
pub fn plan_event(order: &Order, event: &PaymentEvent) -> EventPlan {
    let previous_status = order.status;
    let next_status = state_machine::payment_edge(previous_status, event.status).unwrap_or(previous_status);
    // paid_at is set the first time a successful payment is seen, even when the status itself
    // cannot move any further. Once set it is never cleared.
    let set_paid_at = event.status == MappedStatus::Paid && order.paid_at.is_none();
    let new_payment_reference = match &event.provider_reference {
        Some(r) if !r.is_empty() && order.payment_reference_is_placeholder() => Some(r.clone()),
        _ => None,
    };
    EventPlan { previous_status, next_status, set_paid_at, new_payment_reference }
}

/// `PaymentEventApi` consumes normalized provider events and drives the order lifecycle. It also
/// provides the admin-triggered replay, reconciliation, and manual mark-paid operations, all of
/// which funnel through the same idempotent application path.
pub struct PaymentEventApi<B> {
    db: B,
}

impl<B> Debug for PaymentEventApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentEventApi")
    }
}

impl<B> PaymentEventApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> PaymentEventApi<B>
where B: SettlementDatabase
{
    /// Applies a provider notification. Always returns a definitive outcome: a missing order
    /// reports `applied == false` (with a trace record) rather than an error, because the
    /// provider's retrier cannot act on an exception and must not be made to retry forever.
    pub async fn process(&self, event: &PaymentEvent) -> Result<EventOutcome, WorkflowError> {
        self.process_from(event, "webhook").await
    }

    async fn process_from(&self, event: &PaymentEvent, source: &str) -> Result<EventOutcome, WorkflowError> {
        let outcome = self.db.apply_payment_event(event, source, &system_actor()).await?;
        match (&outcome.previous_status, &outcome.current_status) {
            (Some(prev), Some(cur)) if prev != cur => {
                info!("📨️ Event [{}] moved order {} from {prev} to {cur}", event.event_id, event.order_id);
            },
            (Some(_), Some(_)) => {
                debug!("📨️ Event [{}] for order {} was a no-op on the status", event.event_id, event.order_id);
            },
            _ => {
                warn!("📨️ Event [{}] references unknown order {}. Recorded and ignored.", event.event_id, event.order_id);
            },
        }
        Ok(outcome)
    }

    /// Re-applies a stored inbound event against the processor. Safe for any event the log holds,
    /// since application is idempotent.
    pub async fn replay(&self, inbound_event_id: i64, actor: &Actor) -> Result<EventOutcome, WorkflowError> {
        let stored = self
            .db
            .fetch_inbound_event(inbound_event_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Inbound event {inbound_event_id} does not exist")))?;
        let event: PaymentEvent = serde_json::from_str(&stored.payload)
            .map_err(|e| WorkflowError::ValidationFailure(format!("Stored payload is not a payment event: {e}")))?;
        debug!("📨️ Replaying stored event [{}] against order {}", stored.event_id, event.order_id);
        let outcome = self.process_from(&event, "replay").await?;
        let entry = NewAuditEntry::new(actor, AuditAction::EventReplayed, EntityType::Order, &event.order_id)
            .with_meta(serde_json::json!({ "inbound_event_id": inbound_event_id, "event_id": stored.event_id }));
        self.db.record_audit(entry).await?;
        Ok(outcome)
    }

    /// Reconciles an order from its most recent stored notification.
    pub async fn reconcile(&self, order_id: &OrderId, actor: &Actor) -> Result<EventOutcome, WorkflowError> {
        let stored = self
            .db
            .most_recent_event_for_order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("No stored events for order {order_id}")))?;
        let event: PaymentEvent = serde_json::from_str(&stored.payload)
            .map_err(|e| WorkflowError::ValidationFailure(format!("Stored payload is not a payment event: {e}")))?;
        debug!("📨️ Reconciling order {order_id} from stored event [{}]", stored.event_id);
        let outcome = self.process_from(&event, "reconcile").await?;
        let entry = NewAuditEntry::new(actor, AuditAction::OrderReconciled, EntityType::Order, order_id)
            .with_meta(serde_json::json!({ "event_id": stored.event_id }));
        self.db.record_audit(entry).await?;
        Ok(outcome)
    }

    /// Marks an order as paid as an audited manual exception. Only permitted from `pending` or
    /// `failed`, and a reason is required. The write goes through the normal event path, so all
    /// the promote-only guarantees hold.
    pub async fn mark_order_paid(
        &self,
        order_id: &OrderId,
        reason: &str,
        actor: &Actor,
    ) -> Result<EventOutcome, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::ValidationFailure("A reason is required to mark an order as paid".into()));
        }
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Order {order_id} does not exist")))?;
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Failed) {
            return Err(WorkflowError::InvalidTransition(format!(
                "Order {order_id} is {}; only pending or failed orders can be marked paid manually",
                order.status
            )));
        }
        let event = PaymentEvent {
            order_id: order_id.clone(),
            status: MappedStatus::Paid,
            amount: order.total,
            currency: order.currency.clone(),
            event_id: format!("manual-{}-{}", order_id.as_str(), Utc::now().timestamp()),
            provider_reference: Some(format!("manual:{}", actor.id)),
            manual_capture: true,
        };
        let outcome = self.process_from(&event, "manual").await?;
        let entry = NewAuditEntry::new(actor, AuditAction::OrderMarkedPaid, EntityType::Order, order_id)
            .with_message(reason);
        self.db.record_audit(entry).await?;
        info!("📨️ Order {order_id} manually marked as paid by {}", actor.id);
        Ok(outcome)
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use settle_common::Money;

    use super::plan_event;
    use crate::db_types::{MappedStatus, Order, OrderId, OrderStatus, PaymentEvent};

    fn order(status: OrderStatus, paid_at: bool, reference: Option<&str>) -> Order {
        Order {
            id: 1,
            order_id: OrderId::from("ord-1"),
            buyer_id: "buyer-1".into(),
            seller_id: "seller-1".into(),
            total: Money::from_whole(100),
            currency: "EUR".into(),
            status,
            payment_reference: reference.map(String::from),
            paid_at: paid_at.then(Utc::now),
            cancel_reason: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event(status: MappedStatus, reference: Option<&str>) -> PaymentEvent {
        PaymentEvent {
            order_id: OrderId::from("ord-1"),
            status,
            amount: Money::from_whole(100),
            currency: "EUR".into(),
            event_id: "evt-1".into(),
            provider_reference: reference.map(String::from),
            manual_capture: false,
        }
    }

    #[test]
    fn paid_event_promotes_pending_order() {
        let plan = plan_event(&order(OrderStatus::Pending, false, None), &event(MappedStatus::Paid, Some("pi_123")));
        assert_eq!(plan.next_status, OrderStatus::Paid);
        assert!(plan.set_paid_at);
        assert_eq!(plan.new_payment_reference.as_deref(), Some("pi_123"));
        assert!(plan.dirty());
    }

    #[test]
    fn second_application_is_a_no_op() {
        let plan = plan_event(&order(OrderStatus::Paid, true, Some("pi_123")), &event(MappedStatus::Paid, Some("pi_123")));
        assert_eq!(plan.next_status, OrderStatus::Paid);
        assert!(!plan.set_paid_at);
        assert_eq!(plan.new_payment_reference, None);
        assert!(!plan.dirty());
    }

    #[test]
    fn failed_event_never_reverts_a_paid_order() {
        for status in [OrderStatus::Paid, OrderStatus::Packed, OrderStatus::Shipped, OrderStatus::Delivered] {
            let plan = plan_event(&order(status, true, Some("pi_123")), &event(MappedStatus::Failed, None));
            assert_eq!(plan.next_status, status);
            assert!(!plan.dirty());
        }
    }

    #[test]
    fn failed_event_parks_a_pending_order() {
        let plan = plan_event(&order(OrderStatus::Pending, false, None), &event(MappedStatus::Failed, None));
        assert_eq!(plan.next_status, OrderStatus::Failed);
        assert!(plan.dirty());
    }

    #[test]
    fn provider_reference_never_clobbers_another() {
        let plan = plan_event(&order(OrderStatus::Paid, true, Some("pi_first")), &event(MappedStatus::Paid, Some("pi_second")));
        assert_eq!(plan.new_payment_reference, None);
    }

    #[test]
    fn provider_reference_replaces_manual_placeholder() {
        let plan =
            plan_event(&order(OrderStatus::Paid, true, Some("manual:alice")), &event(MappedStatus::Paid, Some("pi_real")));
        assert_eq!(plan.new_payment_reference.as_deref(), Some("pi_real"));
    }

    #[test]
    fn paid_at_is_set_even_when_status_cannot_move() {
        // A paid event for an order that somehow advanced without paid_at still records it.
        let plan = plan_event(&order(OrderStatus::Packed, false, Some("pi_123")), &event(MappedStatus::Paid, None));
        assert_eq!(plan.next_status, OrderStatus::Packed);
        assert!(plan.set_paid_at);
        assert!(plan.dirty());
    }
}
