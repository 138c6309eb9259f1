//! Dual-control seller-payout workflow. Mirrors the refund workflow with statuses
//! `{pending, paid, failed}`, plus the manual mark-paid exception path that writes the payout's
//! negative ledger entry.

use std::fmt::Debug;

use log::*;
use settle_common::Money;
use tokio::time::timeout;

use crate::{
    api::{errors::WorkflowError, WorkflowConfig},
    db_types::{
        Actor,
        AuditAction,
        EventResult,
        NewInboundEvent,
        NewPayoutRequest,
        OrderId,
        PayoutRequest,
        PayoutStatus,
    },
    traits::{ExecutionResult, SettlementDatabase, SettlementGateway},
};

/// Shortest acceptable justification for manually marking a payout as paid.
pub const MIN_MARK_PAID_REASON_LEN: usize = 8;

pub struct PayoutApi<B, G> {
    db: B,
    gateway: G,
    config: WorkflowConfig,
}

impl<B, G> Debug for PayoutApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayoutApi")
    }
}

impl<B, G> PayoutApi<B, G> {
    pub fn new(db: B, gateway: G, config: WorkflowConfig) -> Self {
        Self { db, gateway, config }
    }
}

impl<B, G> PayoutApi<B, G>
where
    B: SettlementDatabase,
    G: SettlementGateway,
{
    /// Creates a payout request for the seller of an order. Payouts always wait for a second
    /// person: unlike small refunds, there is no below-threshold immediate path, because a payout
    /// is the irreversible end of the settlement.
    pub async fn request(&self, order_id: &OrderId, amount: Money, actor: &Actor) -> Result<PayoutRequest, WorkflowError> {
        if amount.value() <= 0 {
            return Err(WorkflowError::ValidationFailure("Payout amount must be positive".into()));
        }
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Order {order_id} does not exist")))?;
        if amount > order.total {
            return Err(WorkflowError::ValidationFailure(format!(
                "Payout of {amount} exceeds the order total of {}",
                order.total
            )));
        }
        let payout = self
            .db
            .insert_payout(
                NewPayoutRequest {
                    order_id: order_id.clone(),
                    seller_id: order.seller_id.clone(),
                    amount,
                    currency: order.currency.clone(),
                    requested_by: actor.id.clone(),
                },
                actor,
            )
            .await?;
        info!("🏦️ Payout #{} of {amount} to {} awaits approval", payout.id, payout.seller_id);
        Ok(payout)
    }

    /// Approves and executes a pending payout. The approver must differ from the requester.
    pub async fn approve(&self, payout_id: i64, actor: &Actor) -> Result<PayoutRequest, WorkflowError> {
        let payout = self
            .db
            .fetch_payout(payout_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Payout {payout_id} does not exist")))?;
        if payout.requested_by.trim().is_empty() {
            return Err(WorkflowError::ApprovalRequired);
        }
        if payout.requested_by == actor.id {
            warn!("🏦️ {} attempted to approve their own payout #{payout_id}", actor.id);
            return Err(WorkflowError::SelfApprovalForbidden);
        }
        self.execute(payout_id, &[PayoutStatus::Pending], AuditAction::PayoutApproved, actor).await
    }

    /// Manual exception path. Requires a substantive reason, marks the payout `paid`, and inserts
    /// the payout's negative ledger entry exactly once across any number of calls.
    pub async fn mark_paid(&self, payout_id: i64, reason: &str, actor: &Actor) -> Result<PayoutRequest, WorkflowError> {
        if reason.trim().len() < MIN_MARK_PAID_REASON_LEN {
            return Err(WorkflowError::ValidationFailure(format!(
                "A reason of at least {MIN_MARK_PAID_REASON_LEN} characters is required to mark a payout as paid"
            )));
        }
        let (payout, ledger_inserted) = self.db.mark_payout_paid(payout_id, reason, actor).await?;
        if ledger_inserted {
            info!("🏦️ Payout #{payout_id} manually marked paid by {}; ledger entry written", actor.id);
        } else {
            debug!("🏦️ Payout #{payout_id} already has a ledger entry; manual mark-paid was a ledger no-op");
        }
        Ok(payout)
    }

    async fn execute(
        &self,
        payout_id: i64,
        allowed_from: &[PayoutStatus],
        claim_action: AuditAction,
        actor: &Actor,
    ) -> Result<PayoutRequest, WorkflowError> {
        let claimed = self.db.claim_payout_execution(payout_id, allowed_from, actor, claim_action).await?;
        let payout = match claimed {
            Some(p) => p,
            None => {
                let current = self
                    .db
                    .fetch_payout(payout_id)
                    .await?
                    .ok_or_else(|| WorkflowError::NotFound(format!("Payout {payout_id} does not exist")))?;
                return match current.status {
                    PayoutStatus::Processing => Err(WorkflowError::Conflict(format!(
                        "Payout {payout_id} is already being executed"
                    ))),
                    status => Err(WorkflowError::InvalidTransition(format!(
                        "Payout {payout_id} is {status}; execution is allowed from {}",
                        allowed_from.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    ))),
                };
            },
        };
        debug!("🏦️ Executing payout #{payout_id} of {} against the gateway", payout.amount);
        let call = self.gateway.execute_payout(&payout.seller_id, &payout.order_id, payout.amount, &payout.currency);
        let result = match timeout(self.config.gateway_timeout, call).await {
            Ok(Ok(reference)) => ExecutionResult::Succeeded { provider_reference: reference },
            Ok(Err(e)) => {
                ExecutionResult::Failed { reason_code: Some("gateway_error".into()), reason: e.to_string() }
            },
            Err(_) => ExecutionResult::Failed {
                reason_code: Some("gateway_timeout".into()),
                reason: format!("No response within {}s", self.config.gateway_timeout.as_secs()),
            },
        };
        self.log_gateway_call(&payout, &result).await?;
        let finalized = self.db.complete_payout(payout_id, result.clone(), actor).await?;
        match result {
            ExecutionResult::Succeeded { provider_reference } => {
                info!("🏦️ Payout #{payout_id} settled by the gateway as [{provider_reference}]");
                Ok(finalized)
            },
            ExecutionResult::Failed { reason, .. } => {
                warn!("🏦️ Payout #{payout_id} failed at the gateway: {reason}");
                Err(WorkflowError::GatewayFailure(reason))
            },
        }
    }

    async fn log_gateway_call(&self, payout: &PayoutRequest, result: &ExecutionResult) -> Result<(), WorkflowError> {
        let (outcome, message) = match result {
            ExecutionResult::Succeeded { provider_reference } => (EventResult::Ok, provider_reference.clone()),
            ExecutionResult::Failed { reason, .. } => (EventResult::Error, reason.clone()),
        };
        let payload = serde_json::json!({
            "instruction": "payout",
            "payout_id": payout.id,
            "order_id": payout.order_id.as_str(),
            "seller_id": payout.seller_id,
            "amount": payout.amount,
            "currency": payout.currency,
        });
        self.db
            .record_inbound_event(NewInboundEvent {
                source: "gateway".into(),
                event_id: format!("payout-{}", payout.id),
                order_id: Some(payout.order_id.clone()),
                payload: payload.to_string(),
                result: outcome,
                message: Some(message),
            })
            .await?;
        Ok(())
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
