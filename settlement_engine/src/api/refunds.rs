//! Dual-control refund workflow.
//!
//! A refund request is created by one admin and, when it is at or above the large-refund
//! threshold, executed only after a *different* admin approves it. Execution claims the row with
//! a status compare-and-swap before touching the gateway, so two concurrent approvals can never
//! both move money.

use std::fmt::Debug;

use log::*;
use tokio::time::timeout;

use crate::{
    api::{errors::WorkflowError, WorkflowConfig},
    db_types::{
        Actor,
        AuditAction,
        EventResult,
        NewInboundEvent,
        NewRefundRequest,
        OrderId,
        RefundRequest,
        RefundStatus,
    },
    traits::{ExecutionResult, SettlementDatabase, SettlementGateway},
};

pub struct RefundApi<B, G> {
    db: B,
    gateway: G,
    config: WorkflowConfig,
}

impl<B, G> Debug for RefundApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundApi")
    }
}

impl<B, G> RefundApi<B, G> {
    pub fn new(db: B, gateway: G, config: WorkflowConfig) -> Self {
        Self { db, gateway, config }
    }
}

impl<B, G> RefundApi<B, G>
where
    B: SettlementDatabase,
    G: SettlementGateway,
{
    /// Creates a refund request against an order. Requests below the large-refund threshold are
    /// executed immediately on behalf of the requester; larger ones park in `pending` until a
    /// second person calls [`Self::approve`].
    pub async fn request(
        &self,
        order_id: &OrderId,
        amount: settle_common::Money,
        actor: &Actor,
    ) -> Result<RefundRequest, WorkflowError> {
        if amount.value() <= 0 {
            return Err(WorkflowError::ValidationFailure("Refund amount must be positive".into()));
        }
        let order = self
            .db
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Order {order_id} does not exist")))?;
        if amount > order.total {
            return Err(WorkflowError::ValidationFailure(format!(
                "Refund of {amount} exceeds the order total of {}",
                order.total
            )));
        }
        let refund = self
            .db
            .insert_refund(
                NewRefundRequest {
                    order_id: order_id.clone(),
                    amount,
                    currency: order.currency.clone(),
                    requested_by: actor.id.clone(),
                },
                actor,
            )
            .await?;
        if amount >= self.config.large_refund_threshold {
            info!(
                "💸️ Refund #{} of {amount} for order {order_id} requires second-person approval",
                refund.id
            );
            return Ok(refund);
        }
        debug!("💸️ Refund #{} of {amount} is below the approval threshold; executing now", refund.id);
        match self.execute(refund.id, &[RefundStatus::Pending], AuditAction::RefundApproved, actor).await {
            Ok(refund) => Ok(refund),
            // The request itself succeeded; the failed execution is recorded on the row and is
            // retryable, so report the row rather than the gateway error.
            Err(WorkflowError::GatewayFailure(e)) => {
                warn!("💸️ Immediate execution of refund #{} failed: {e}", refund.id);
                self.db
                    .fetch_refund(refund.id)
                    .await?
                    .ok_or_else(|| WorkflowError::NotFound(format!("Refund {} does not exist", refund.id)))
            },
            Err(e) => Err(e),
        }
    }

    /// Approves and executes a pending refund. The approver must differ from the requester,
    /// always, regardless of amount.
    pub async fn approve(&self, refund_id: i64, actor: &Actor) -> Result<RefundRequest, WorkflowError> {
        let refund = self
            .db
            .fetch_refund(refund_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Refund {refund_id} does not exist")))?;
        if refund.requested_by.trim().is_empty() {
            return Err(WorkflowError::ApprovalRequired);
        }
        if refund.requested_by == actor.id {
            warn!("💸️ {} attempted to approve their own refund #{refund_id}", actor.id);
            return Err(WorkflowError::SelfApprovalForbidden);
        }
        self.execute(refund_id, &[RefundStatus::Pending], AuditAction::RefundApproved, actor).await
    }

    /// Re-runs gateway execution for a failed refund. A single-person action: dual control
    /// applies to the original approval, not to retries.
    pub async fn retry(&self, refund_id: i64, actor: &Actor) -> Result<RefundRequest, WorkflowError> {
        self.db
            .fetch_refund(refund_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Refund {refund_id} does not exist")))?;
        self.execute(refund_id, &[RefundStatus::Failed], AuditAction::RefundRetried, actor).await
    }

    /// Manual override that parks a refund in `failed` with an operator-supplied reason.
    pub async fn mark_failed(
        &self,
        refund_id: i64,
        reason_code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<RefundRequest, WorkflowError> {
        if reason_code.trim().is_empty() || reason.trim().is_empty() {
            return Err(WorkflowError::ValidationFailure(
                "A reason code and a reason are required to mark a refund as failed".into(),
            ));
        }
        let refund = self.db.mark_refund_failed(refund_id, reason_code, reason, actor).await?;
        info!("💸️ Refund #{refund_id} manually marked as failed by {}: {reason}", actor.id);
        Ok(refund)
    }

    /// Claims the refund with a status CAS, runs the gateway call under the configured timeout,
    /// and finalizes the row. A lost claim means another execution is in flight or the refund has
    /// settled.
    async fn execute(
        &self,
        refund_id: i64,
        allowed_from: &[RefundStatus],
        claim_action: AuditAction,
        actor: &Actor,
    ) -> Result<RefundRequest, WorkflowError> {
        let claimed = self.db.claim_refund_execution(refund_id, allowed_from, actor, claim_action).await?;
        let refund = match claimed {
            Some(r) => r,
            None => {
                let current = self
                    .db
                    .fetch_refund(refund_id)
                    .await?
                    .ok_or_else(|| WorkflowError::NotFound(format!("Refund {refund_id} does not exist")))?;
                return match current.status {
                    RefundStatus::Processing => Err(WorkflowError::Conflict(format!(
                        "Refund {refund_id} is already being executed"
                    ))),
                    status => Err(WorkflowError::InvalidTransition(format!(
                        "Refund {refund_id} is {status}; execution is allowed from {}",
                        allowed_from.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    ))),
                };
            },
        };
        debug!("💸️ Executing refund #{refund_id} of {} against the gateway", refund.amount);
        let call = self.gateway.execute_refund(&refund.order_id, refund.amount, &refund.currency);
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
        self.log_gateway_call(&refund, &result).await?;
        let finalized = self.db.complete_refund(refund_id, result.clone(), actor).await?;
        match result {
            ExecutionResult::Succeeded { provider_reference } => {
                info!("💸️ Refund #{refund_id} settled by the gateway as [{provider_reference}]");
                Ok(finalized)
            },
            ExecutionResult::Failed { reason, .. } => {
                warn!("💸️ Refund #{refund_id} failed at the gateway: {reason}");
                Err(WorkflowError::GatewayFailure(reason))
            },
        }
    }

    /// Every execution attempt leaves a gateway-call trace alongside the audit entry, so the
    /// forensic log shows each time money movement was attempted.
    async fn log_gateway_call(&self, refund: &RefundRequest, result: &ExecutionResult) -> Result<(), WorkflowError> {
        let (outcome, message) = match result {
            ExecutionResult::Succeeded { provider_reference } => (EventResult::Ok, provider_reference.clone()),
            ExecutionResult::Failed { reason, .. } => (EventResult::Error, reason.clone()),
        };
        let payload = serde_json::json!({
            "instruction": "refund",
            "refund_id": refund.id,
            "order_id": refund.order_id.as_str(),
            "amount": refund.amount,
            "currency": refund.currency,
        });
        self.db
            .record_inbound_event(NewInboundEvent {
                source: "gateway".into(),
                event_id: format!("refund-{}", refund.id),
                order_id: Some(refund.order_id.clone()),
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
