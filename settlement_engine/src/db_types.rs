use std::{fmt::Display, ops::Deref, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_common::Money;
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------        OrderId        -------------------------------------------------------
/// The storefront-assigned order identifier. Opaque to the settlement core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl<S: Into<String>> From<S> for OrderId {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------     OrderStatus       -------------------------------------------------------
/// The closed set of order lifecycle states. Transitions between them are governed exclusively by
/// [`crate::state_machine`]; an invalid status cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created at checkout; no successful payment yet.
    Pending,
    /// Payment received in full.
    Paid,
    /// The payment provider reported a failure before the order was paid. Recoverable: a later
    /// `paid` event promotes the order to `Paid`.
    Failed,
    Packed,
    Shipped,
    /// Quiescent, not terminal: a delivered order can still be refunded or returned.
    Delivered,
    Canceled,
    Refunded,
    ReturnRequested,
    ReturnApproved,
    Returned,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Packed => "packed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::ReturnRequested => "return_requested",
            OrderStatus::ReturnApproved => "return_approved",
            OrderStatus::Returned => "returned",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "packed" => Ok(Self::Packed),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "canceled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            "return_requested" => Ok(Self::ReturnRequested),
            "return_approved" => Ok(Self::ReturnApproved),
            "returned" => Ok(Self::Returned),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------     RefundStatus      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    /// Claimed for execution. Transient: held only while a gateway call is in flight, so that two
    /// concurrent approvals cannot both move money.
    Processing,
    Refunded,
    Failed,
}

impl Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Refunded => "refunded",
            RefundStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

//--------------------------------------     PayoutStatus      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    /// See [`RefundStatus::Processing`].
    Processing,
    Paid,
    Failed,
}

impl Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

//--------------------------------------        Role           -------------------------------------------------------
/// Authorisation roles for administrative actors. Authentication itself is handled by the server
/// layer; the engine only ever sees an [`Actor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ReadOnly,
    Admin,
    /// Required for money movements (refunds, payouts, manual settlement overrides).
    Finance,
    SuperAdmin,
    /// Automated ingestion (webhook processor, reconciliation jobs). Never assigned to a human.
    System,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::ReadOnly => "read_only",
            Role::Admin => "admin",
            Role::Finance => "finance",
            Role::SuperAdmin => "super_admin",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" => Ok(Self::ReadOnly),
            "admin" => Ok(Self::Admin),
            "finance" => Ok(Self::Finance),
            "super_admin" => Ok(Self::SuperAdmin),
            "system" => Ok(Self::System),
            s => Err(ConversionError(format!("Invalid role: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(pub Vec<Role>);

impl Deref for Roles {
    type Target = [Role];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Role>> for Roles {
    fn from(v: Vec<Role>) -> Self {
        Self(v)
    }
}

/// The authenticated actor performing an administrative operation. Every mutating engine call
/// takes one so the audit trail records who did what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new<S: Into<String>>(id: S, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

//--------------------------------------        Order          -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub buyer_id: String,
    pub seller_id: String,
    pub total: Money,
    pub currency: String,
    pub status: OrderStatus,
    /// Opaque provider reference. May start out as a `manual:` placeholder, in which case a real
    /// provider reference is allowed to replace it.
    pub payment_reference: Option<String>,
    /// Set once when the first successful payment lands; never cleared afterwards.
    pub paid_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the stored payment reference may be replaced by an incoming provider reference.
    /// A real provider reference never clobbers another provider reference.
    pub fn payment_reference_is_placeholder(&self) -> bool {
        match &self.payment_reference {
            None => true,
            Some(r) => r.is_empty() || r.starts_with("manual:"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub buyer_id: String,
    pub seller_id: String,
    pub total: Money,
    pub currency: String,
}

impl NewOrder {
    pub fn new(order_id: OrderId, buyer_id: String, seller_id: String, total: Money) -> Self {
        Self { order_id, buyer_id, seller_id, total, currency: "EUR".to_string() }
    }
}

//--------------------------------------    RefundRequest      -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RefundRequest {
    pub id: i64,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub status: RefundStatus,
    /// First-class requester field. Dual control compares the approver against this, with the
    /// audit trail retained purely for history.
    pub requested_by: String,
    pub reason_code: Option<String>,
    pub failure_reason: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefundRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub requested_by: String,
}

//--------------------------------------    PayoutRequest      -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PayoutRequest {
    pub id: i64,
    pub order_id: OrderId,
    pub seller_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PayoutStatus,
    pub requested_by: String,
    pub provider_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayoutRequest {
    pub order_id: OrderId,
    pub seller_id: String,
    pub amount: Money,
    pub currency: String,
    pub requested_by: String,
}

//--------------------------------------    InboundEvent       -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    Ok,
    Error,
}

impl Display for EventResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventResult::Ok => f.write_str("ok"),
            EventResult::Error => f.write_str("error"),
        }
    }
}

/// A stored copy of an inbound provider notification (or outbound gateway call), kept for replay
/// and reconciliation. Distinct from the audit log.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InboundEvent {
    pub id: i64,
    pub source: String,
    pub event_id: String,
    pub order_id: Option<OrderId>,
    pub payload: String,
    pub result: EventResult,
    pub message: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInboundEvent {
    pub source: String,
    pub event_id: String,
    pub order_id: Option<OrderId>,
    pub payload: String,
    pub result: EventResult,
    pub message: Option<String>,
}

//--------------------------------------    AuditLogEntry      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Order,
    Refund,
    Payout,
}

impl Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Order => "order",
            EntityType::Refund => "refund",
            EntityType::Payout => "payout",
        };
        f.write_str(s)
    }
}

/// Names of state-changing actions as they appear in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OrderStatusChanged,
    OrderMarkedPaid,
    OrderReconciled,
    EventReplayed,
    RefundRequested,
    RefundApproved,
    RefundExecuted,
    RefundRetried,
    RefundMarkedFailed,
    PayoutRequested,
    PayoutApproved,
    PayoutExecuted,
    PayoutMarkedPaid,
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::OrderStatusChanged => "order_status_changed",
            AuditAction::OrderMarkedPaid => "order_marked_paid",
            AuditAction::OrderReconciled => "order_reconciled",
            AuditAction::EventReplayed => "event_replayed",
            AuditAction::RefundRequested => "refund_requested",
            AuditAction::RefundApproved => "refund_approved",
            AuditAction::RefundExecuted => "refund_executed",
            AuditAction::RefundRetried => "refund_retried",
            AuditAction::RefundMarkedFailed => "refund_marked_failed",
            AuditAction::PayoutRequested => "payout_requested",
            AuditAction::PayoutApproved => "payout_approved",
            AuditAction::PayoutExecuted => "payout_executed",
            AuditAction::PayoutMarkedPaid => "payout_marked_paid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor_id: String,
    pub actor_role: Role,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub message: Option<String>,
    pub meta: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: String,
    pub actor_role: Role,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub message: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl NewAuditEntry {
    pub fn new(actor: &Actor, action: AuditAction, entity_type: EntityType, entity_id: impl Display) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            message: None,
            meta: None,
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

//--------------------------------------     LedgerEntry       -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub amount: Money,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    PaymentEvent       -------------------------------------------------------
/// The status a provider notification maps to, regardless of the provider's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedStatus {
    Paid,
    Failed,
}

impl Display for MappedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappedStatus::Paid => f.write_str("paid"),
            MappedStatus::Failed => f.write_str("failed"),
        }
    }
}

/// The normalized inbound payment notification. Deliveries are at-least-once and unordered, so
/// processing must be idempotent and promote-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_id: OrderId,
    pub status: MappedStatus,
    pub amount: Money,
    pub currency: String,
    pub event_id: String,
    pub provider_reference: Option<String>,
    /// Set when the amount was captured manually on the provider dashboard rather than through
    /// the normal authorisation flow.
    #[serde(default)]
    pub manual_capture: bool,
}

/// What applying a payment event did to the order. A second application of the same event reports
/// `applied == false` with the status fields unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub applied: bool,
    pub previous_status: Option<OrderStatus>,
    pub current_status: Option<OrderStatus>,
    pub set_paid_at: bool,
}

impl EventOutcome {
    /// The outcome reported when the referenced order does not exist. Not an error: the caller is
    /// a webhook retrier that cannot act on one.
    pub fn not_applied() -> Self {
        Self { applied: false, previous_status: None, current_status: None, set_paid_at: false }
    }
}
