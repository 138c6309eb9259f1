//! `SqliteDatabase` is the concrete SQLite implementation of the settlement storage backend.
//!
//! Every mutating method runs its reads and writes inside one transaction, so the row update and
//! its audit/trace records land atomically or not at all. The one exception is a payment event
//! whose order write ultimately fails: its trace record is written on its own connection, so the
//! delivery log keeps the event even when the transaction rolled back.
use std::fmt::Debug;

use log::*;
use serde_json::json;
use sqlx::SqlitePool;

use super::{
    db::{audit, inbound_events, ledger, orders, payouts, refunds},
    db_url,
    new_pool,
};
use crate::{
    api::payment_events::plan_event,
    db_types::{
        Actor,
        AuditAction,
        AuditLogEntry,
        EntityType,
        EventOutcome,
        EventResult,
        InboundEvent,
        LedgerEntry,
        NewAuditEntry,
        NewInboundEvent,
        NewOrder,
        NewPayoutRequest,
        NewRefundRequest,
        Order,
        OrderId,
        OrderStatus,
        PaymentEvent,
        PayoutRequest,
        PayoutStatus,
        RefundRequest,
        RefundStatus,
    },
    state_machine,
    traits::{ExecutionResult, SettlementDatabase, SettlementDbError},
};

/// Attempts per payment event before the write conflict is reported to the caller.
const MAX_EVENT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects to the database given by the `SSC_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        debug!("🗃️ Connected to database {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One read-evaluate-write pass for a payment event. A version mismatch on the order row
    /// rolls the whole transaction back and surfaces as `ConcurrentUpdate`.
    async fn apply_event_once(
        &self,
        event: &PaymentEvent,
        source: &str,
        actor: &Actor,
        payload: &str,
    ) -> Result<EventOutcome, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let outcome = match orders::fetch_order_by_order_id(&event.order_id, &mut tx).await? {
            None => {
                let trace = NewInboundEvent {
                    source: source.to_string(),
                    event_id: event.event_id.clone(),
                    order_id: Some(event.order_id.clone()),
                    payload: payload.to_string(),
                    result: EventResult::Error,
                    message: Some(format!("Order {} does not exist", event.order_id)),
                };
                inbound_events::insert_event(trace, &mut tx).await?;
                EventOutcome::not_applied()
            },
            Some(order) => {
                let plan = plan_event(&order, event);
                if plan.dirty() {
                    orders::apply_event_plan(&order, &plan, &mut tx).await?;
                }
                let moved = plan.next_status != plan.previous_status;
                let message = if moved {
                    format!("Status moved from {} to {}", plan.previous_status, plan.next_status)
                } else {
                    "No status change".to_string()
                };
                let trace = NewInboundEvent {
                    source: source.to_string(),
                    event_id: event.event_id.clone(),
                    order_id: Some(event.order_id.clone()),
                    payload: payload.to_string(),
                    result: EventResult::Ok,
                    message: Some(message),
                };
                inbound_events::insert_event(trace, &mut tx).await?;
                if moved {
                    let entry =
                        NewAuditEntry::new(actor, AuditAction::OrderStatusChanged, EntityType::Order, &order.order_id)
                            .with_meta(json!({
                                "from": plan.previous_status.to_string(),
                                "to": plan.next_status.to_string(),
                                "event_id": event.event_id,
                            }));
                    audit::insert_entry(entry, &mut tx).await?;
                }
                EventOutcome {
                    applied: plan.dirty(),
                    previous_status: Some(plan.previous_status),
                    current_status: Some(plan.next_status),
                    set_paid_at: plan.set_paid_at,
                }
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        orders::idempotent_insert(order, &mut conn).await
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn apply_payment_event(
        &self,
        event: &PaymentEvent,
        source: &str,
        actor: &Actor,
    ) -> Result<EventOutcome, SettlementDbError> {
        let payload =
            serde_json::to_string(event).map_err(|e| SettlementDbError::DatabaseError(e.to_string()))?;
        let mut attempt = 1;
        let err = loop {
            match self.apply_event_once(event, source, actor, &payload).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < MAX_EVENT_ATTEMPTS => {
                    debug!("🗃️ Event [{}] hit a write conflict on attempt {attempt}, re-reading the order. {e}", event.event_id);
                    attempt += 1;
                },
                Err(e) => break e,
            }
        };
        // A failed order write still leaves a delivery log entry for later replay.
        let trace = NewInboundEvent {
            source: source.to_string(),
            event_id: event.event_id.clone(),
            order_id: Some(event.order_id.clone()),
            payload,
            result: EventResult::Error,
            message: Some(err.to_string()),
        };
        if let Err(trace_err) = self.record_inbound_event(trace).await {
            warn!("🗃️ Event [{}] failed and its trace could not be recorded either: {trace_err}", event.event_id);
        }
        Err(err)
    }

    async fn transition_order(
        &self,
        order_id: &OrderId,
        to: OrderStatus,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Order, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut tx)
            .await?
            .ok_or_else(|| SettlementDbError::OrderNotFound(order_id.clone()))?;
        let next = state_machine::apply(order.status, to)?;
        let cancel_reason = (next == OrderStatus::Canceled).then_some(reason).flatten();
        let updated = orders::update_order_status(&order, next, cancel_reason, &mut tx).await?;
        let mut entry = NewAuditEntry::new(actor, AuditAction::OrderStatusChanged, EntityType::Order, order_id)
            .with_meta(json!({ "from": order.status.to_string(), "to": next.to_string() }));
        if let Some(reason) = reason {
            entry = entry.with_message(reason);
        }
        audit::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {order_id} moved from {} to {next} by {}", order.status, actor.id);
        Ok(updated)
    }

    async fn fetch_inbound_event(&self, id: i64) -> Result<Option<InboundEvent>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let event = inbound_events::fetch_event(id, &mut conn).await?;
        Ok(event)
    }

    async fn most_recent_event_for_order(&self, order_id: &OrderId) -> Result<Option<InboundEvent>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let event = inbound_events::most_recent_for_order(order_id, &mut conn).await?;
        Ok(event)
    }

    async fn record_inbound_event(&self, event: NewInboundEvent) -> Result<InboundEvent, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        inbound_events::insert_event(event, &mut conn).await
    }

    async fn insert_refund(&self, refund: NewRefundRequest, actor: &Actor) -> Result<RefundRequest, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::insert_refund(refund, &mut tx).await?;
        let entry = NewAuditEntry::new(actor, AuditAction::RefundRequested, EntityType::Refund, refund.id).with_meta(
            json!({ "order_id": refund.order_id.as_str(), "amount": refund.amount.to_string() }),
        );
        audit::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Refund {} for order {} requested by {}", refund.id, refund.order_id, actor.id);
        Ok(refund)
    }

    async fn fetch_refund(&self, id: i64) -> Result<Option<RefundRequest>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::fetch_refund(id, &mut conn).await?;
        Ok(refund)
    }

    async fn claim_refund_execution(
        &self,
        id: i64,
        allowed_from: &[RefundStatus],
        actor: &Actor,
        action: AuditAction,
    ) -> Result<Option<RefundRequest>, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let claimed = refunds::claim_execution(id, allowed_from, &mut tx).await?;
        if let Some(refund) = &claimed {
            let entry = NewAuditEntry::new(actor, action, EntityType::Refund, id)
                .with_meta(json!({ "order_id": refund.order_id.as_str(), "amount": refund.amount.to_string() }));
            audit::insert_entry(entry, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn complete_refund(
        &self,
        id: i64,
        result: ExecutionResult,
        actor: &Actor,
    ) -> Result<RefundRequest, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let refund = match result {
            ExecutionResult::Succeeded { provider_reference } => {
                let refund = refunds::settle(id, &provider_reference, &mut tx).await?;
                let entry = NewAuditEntry::new(actor, AuditAction::RefundExecuted, EntityType::Refund, id).with_meta(
                    json!({ "provider_reference": provider_reference, "amount": refund.amount.to_string() }),
                );
                audit::insert_entry(entry, &mut tx).await?;
                // A refund of a delivered order concludes its lifecycle.
                if let Some(order) = orders::fetch_order_by_order_id(&refund.order_id, &mut tx).await? {
                    if state_machine::validate(order.status, OrderStatus::Refunded) {
                        orders::update_order_status(&order, OrderStatus::Refunded, None, &mut tx).await?;
                        let entry = NewAuditEntry::new(
                            actor,
                            AuditAction::OrderStatusChanged,
                            EntityType::Order,
                            &order.order_id,
                        )
                        .with_meta(json!({
                            "from": order.status.to_string(),
                            "to": OrderStatus::Refunded.to_string(),
                            "refund_id": id,
                        }));
                        audit::insert_entry(entry, &mut tx).await?;
                    }
                }
                info!("💸️ Refund {id} for order {} settled", refund.order_id);
                refund
            },
            ExecutionResult::Failed { reason_code, reason } => {
                let refund = refunds::fail_execution(id, reason_code.as_deref(), &reason, &mut tx).await?;
                warn!("💸️ Refund {id} for order {} failed: {reason}", refund.order_id);
                refund
            },
        };
        tx.commit().await?;
        Ok(refund)
    }

    async fn mark_refund_failed(
        &self,
        id: i64,
        reason_code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<RefundRequest, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::mark_failed(id, reason_code, reason, &mut tx).await?;
        let entry = NewAuditEntry::new(actor, AuditAction::RefundMarkedFailed, EntityType::Refund, id)
            .with_message(reason)
            .with_meta(json!({ "reason_code": reason_code }));
        audit::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn insert_payout(&self, payout: NewPayoutRequest, actor: &Actor) -> Result<PayoutRequest, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let payout = payouts::insert_payout(payout, &mut tx).await?;
        let entry = NewAuditEntry::new(actor, AuditAction::PayoutRequested, EntityType::Payout, payout.id).with_meta(
            json!({
                "order_id": payout.order_id.as_str(),
                "seller_id": payout.seller_id,
                "amount": payout.amount.to_string(),
            }),
        );
        audit::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Payout {} to seller {} requested by {}", payout.id, payout.seller_id, actor.id);
        Ok(payout)
    }

    async fn fetch_payout(&self, id: i64) -> Result<Option<PayoutRequest>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let payout = payouts::fetch_payout(id, &mut conn).await?;
        Ok(payout)
    }

    async fn claim_payout_execution(
        &self,
        id: i64,
        allowed_from: &[PayoutStatus],
        actor: &Actor,
        action: AuditAction,
    ) -> Result<Option<PayoutRequest>, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let claimed = payouts::claim_execution(id, allowed_from, &mut tx).await?;
        if let Some(payout) = &claimed {
            let entry = NewAuditEntry::new(actor, action, EntityType::Payout, id)
                .with_meta(json!({ "seller_id": payout.seller_id, "amount": payout.amount.to_string() }));
            audit::insert_entry(entry, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn complete_payout(
        &self,
        id: i64,
        result: ExecutionResult,
        actor: &Actor,
    ) -> Result<PayoutRequest, SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let payout = match result {
            ExecutionResult::Succeeded { provider_reference } => {
                let payout = payouts::settle(id, &provider_reference, &mut tx).await?;
                // The ledger rows for money leaving the platform are negative.
                ledger::insert_if_absent(
                    EntityType::Payout,
                    &id.to_string(),
                    -payout.amount,
                    Some(&provider_reference),
                    &mut tx,
                )
                .await?;
                let entry = NewAuditEntry::new(actor, AuditAction::PayoutExecuted, EntityType::Payout, id).with_meta(
                    json!({ "provider_reference": provider_reference, "amount": payout.amount.to_string() }),
                );
                audit::insert_entry(entry, &mut tx).await?;
                info!("🏦️ Payout {id} to seller {} settled", payout.seller_id);
                payout
            },
            ExecutionResult::Failed { reason, .. } => {
                let payout = payouts::fail_execution(id, &reason, &mut tx).await?;
                warn!("🏦️ Payout {id} to seller {} failed: {reason}", payout.seller_id);
                payout
            },
        };
        tx.commit().await?;
        Ok(payout)
    }

    async fn mark_payout_paid(
        &self,
        id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<(PayoutRequest, bool), SettlementDbError> {
        let mut tx = self.pool.begin().await?;
        let (payout, _status_changed) = payouts::mark_paid(id, reason, &mut tx).await?;
        // Idempotence lives in the ledger: the unique constraint ensures at most one entry per
        // payout no matter how many times the operation is invoked.
        let inserted =
            ledger::insert_if_absent(EntityType::Payout, &id.to_string(), -payout.amount, Some(reason), &mut tx).await?;
        let entry = NewAuditEntry::new(actor, AuditAction::PayoutMarkedPaid, EntityType::Payout, id)
            .with_message(reason)
            .with_meta(json!({ "ledger_entry_inserted": inserted }));
        audit::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        if inserted {
            info!("🏦️ Payout {id} manually marked as paid by {}", actor.id);
        } else {
            debug!("🏦️ Payout {id} was already settled; mark-paid by {} was a ledger no-op", actor.id);
        }
        Ok((payout, inserted))
    }

    async fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        audit::insert_entry(entry, &mut conn).await
    }

    async fn most_recent_audit_by_action(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
    ) -> Result<Option<AuditLogEntry>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let entry = audit::most_recent_by_action(entity_type, entity_id, action, &mut conn).await?;
        Ok(entry)
    }

    async fn audit_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let entries = audit::history(entity_type, entity_id, &mut conn).await?;
        Ok(entries)
    }

    async fn ledger_entry_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<LedgerEntry>, SettlementDbError> {
        let mut conn = self.pool.acquire().await?;
        let entry = ledger::fetch_for_entity(entity_type, entity_id, &mut conn).await?;
        Ok(entry)
    }

    async fn close(&mut self) -> Result<(), SettlementDbError> {
        self.pool.close().await;
        Ok(())
    }
}
