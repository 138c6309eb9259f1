use thiserror::Error;

use crate::{
    db_types::{
        Actor,
        AuditAction,
        AuditLogEntry,
        EntityType,
        EventOutcome,
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
    state_machine::InvalidTransition,
};

/// The result of a settlement-gateway execution attempt, as recorded against the local request
/// row.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Succeeded { provider_reference: String },
    Failed { reason_code: Option<String>, reason: String },
}

/// This trait defines the storage behaviour backing the settlement engine.
///
/// Implementations must guarantee that every method body is a single logical read-modify-write:
/// each mutating method runs in one transaction, and order/refund/payout rows are guarded with a
/// version bump or a status compare-and-swap so concurrent webhook deliveries and concurrent
/// approvals cannot interleave destructively. Audit entries accompanying a mutation are written
/// in the same transaction, so a successful return implies the trail is on disk.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    //-------------------------------------- Orders ------------------------------------------

    /// Stores a new order in `pending` status. Idempotent: returns the existing row and `false`
    /// when the order id is already present.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementDbError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, SettlementDbError>;

    /// Applies a normalized payment event to the order under the promote-only rules, in a single
    /// transaction:
    /// * the order row is updated at most once, guarded by its version;
    /// * a trace record is appended to the inbound-event log whether or not anything changed;
    /// * a status-change audit entry is written only when the status actually moved.
    ///
    /// A missing order reports `applied == false` rather than an error, because the caller is a
    /// webhook retrier that cannot act on one. A lost version race is re-evaluated against the
    /// fresh row; if the write still cannot go through, the trace record must be written on a
    /// separate connection before the error is returned, so the delivery log always holds the
    /// event.
    async fn apply_payment_event(
        &self,
        event: &PaymentEvent,
        source: &str,
        actor: &Actor,
    ) -> Result<EventOutcome, SettlementDbError>;

    /// Moves an order along a state-machine edge with a version-guarded write, and records an
    /// audit entry. Rejected edges leave the row untouched.
    async fn transition_order(
        &self,
        order_id: &OrderId,
        to: OrderStatus,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Order, SettlementDbError>;

    //-------------------------------------- Inbound events ----------------------------------

    async fn fetch_inbound_event(&self, id: i64) -> Result<Option<InboundEvent>, SettlementDbError>;

    /// The most recent stored notification for the order, used by admin-triggered reconciliation.
    async fn most_recent_event_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<InboundEvent>, SettlementDbError>;

    /// Appends a record to the inbound-event log (also used for gateway-call traces).
    async fn record_inbound_event(&self, event: NewInboundEvent) -> Result<InboundEvent, SettlementDbError>;

    //-------------------------------------- Refunds -----------------------------------------

    /// Creates a pending refund request and writes the `refund_requested` audit entry in the same
    /// transaction.
    async fn insert_refund(&self, refund: NewRefundRequest, actor: &Actor) -> Result<RefundRequest, SettlementDbError>;

    async fn fetch_refund(&self, id: i64) -> Result<Option<RefundRequest>, SettlementDbError>;

    /// Compare-and-swap claim of a refund for gateway execution: `allowed_from -> processing`.
    /// Returns `None` when the row is no longer in an allowed status (already claimed by a
    /// concurrent approval, or settled). Writes the given audit action on success.
    async fn claim_refund_execution(
        &self,
        id: i64,
        allowed_from: &[RefundStatus],
        actor: &Actor,
        action: AuditAction,
    ) -> Result<Option<RefundRequest>, SettlementDbError>;

    /// Finalizes a gateway attempt on a claimed (`processing`) refund. On success the request
    /// becomes `refunded`, the provider reference is stored, a `refund_executed` audit entry is
    /// written, and a `delivered` order is moved to `refunded` through the state machine. On
    /// failure the request becomes `failed` with the reason recorded, ready for retry.
    async fn complete_refund(
        &self,
        id: i64,
        result: ExecutionResult,
        actor: &Actor,
    ) -> Result<RefundRequest, SettlementDbError>;

    /// Manual override: parks the refund in `failed` with the given reason. Rejected when the
    /// refund has already settled.
    async fn mark_refund_failed(
        &self,
        id: i64,
        reason_code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<RefundRequest, SettlementDbError>;

    //-------------------------------------- Payouts -----------------------------------------

    async fn insert_payout(&self, payout: NewPayoutRequest, actor: &Actor) -> Result<PayoutRequest, SettlementDbError>;

    async fn fetch_payout(&self, id: i64) -> Result<Option<PayoutRequest>, SettlementDbError>;

    /// See [`Self::claim_refund_execution`].
    async fn claim_payout_execution(
        &self,
        id: i64,
        allowed_from: &[PayoutStatus],
        actor: &Actor,
        action: AuditAction,
    ) -> Result<Option<PayoutRequest>, SettlementDbError>;

    /// See [`Self::complete_refund`]. A successful payout stores `paid_at` alongside the
    /// provider reference.
    async fn complete_payout(
        &self,
        id: i64,
        result: ExecutionResult,
        actor: &Actor,
    ) -> Result<PayoutRequest, SettlementDbError>;

    /// Manual exception path: marks the payout `paid` and inserts exactly one negative ledger
    /// entry for the payout amount. The ledger existence check makes repeated calls a no-op on
    /// the ledger; the boolean reports whether an entry was inserted by this call. Every call is
    /// audited.
    async fn mark_payout_paid(
        &self,
        id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<(PayoutRequest, bool), SettlementDbError>;

    //-------------------------------------- Audit trail -------------------------------------

    /// Appends an audit entry. Append-only: nothing in the engine ever updates or deletes one.
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, SettlementDbError>;

    async fn most_recent_audit_by_action(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
    ) -> Result<Option<AuditLogEntry>, SettlementDbError>;

    async fn audit_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, SettlementDbError>;

    //-------------------------------------- Ledger ------------------------------------------

    async fn ledger_entry_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<LedgerEntry>, SettlementDbError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), SettlementDbError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SettlementDbError {
    #[error("Internal database engine error: {0}")]
    DatabaseError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("The requested refund {0} does not exist")]
    RefundNotFound(i64),
    #[error("The requested payout {0} does not exist")]
    PayoutNotFound(i64),
    #[error("The requested inbound event {0} does not exist")]
    EventNotFound(i64),
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),
    #[error("Refund {0} has already been refunded")]
    RefundAlreadySettled(i64),
    #[error("Payout {0} has already been paid")]
    PayoutAlreadySettled(i64),
    #[error("The record was modified concurrently. {0}")]
    ConcurrentUpdate(String),
}

impl SettlementDbError {
    /// Errors that a fresh read-modify-write attempt can resolve: a lost version race, or sqlite
    /// turning away one of two simultaneous writers.
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementDbError::ConcurrentUpdate(_) => true,
            SettlementDbError::DatabaseError(m) => m.contains("database is locked") || m.contains("database is busy"),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SettlementDbError {
    fn from(e: sqlx::Error) -> Self {
        SettlementDbError::DatabaseError(e.to_string())
    }
}
