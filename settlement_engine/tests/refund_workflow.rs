use std::time::Duration;

use settle_common::Money;
use settlement_engine::{
    db_types::*,
    test_utils::{
        mock_gateway::{GatewayCall, MockGateway},
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::{GatewayError, SettlementDatabase},
    RefundApi,
    SqliteDatabase,
    WorkflowConfig,
    WorkflowError,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

fn finance(id: &str) -> Actor {
    Actor::new(id, Role::Finance)
}

async fn seed_order(db: &SqliteDatabase, order_id: &str, total: i64) -> Order {
    let order = NewOrder::new(OrderId::from(order_id), "buyer-1".into(), "seller-1".into(), Money::from_whole(total));
    let (order, _) = db.insert_order(order).await.expect("Error inserting order");
    order
}

fn api(db: &SqliteDatabase, gateway: &MockGateway) -> RefundApi<SqliteDatabase, MockGateway> {
    RefundApi::new(db.clone(), gateway.clone(), WorkflowConfig::default())
}

#[tokio::test]
async fn small_refunds_execute_at_request_time() {
    let db = new_db().await;
    seed_order(&db, "ord-200", 1000).await;
    let gateway = MockGateway::new();
    gateway.succeed_with("re_123");
    let api = api(&db, &gateway);

    let refund = api.request(&OrderId::from("ord-200"), Money::from_whole(100), &finance("alice")).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Refunded);
    assert_eq!(refund.provider_reference.as_deref(), Some("re_123"));
    assert_eq!(gateway.call_count(), 1);
    assert!(matches!(&gateway.calls()[0], GatewayCall::Refund { amount, .. } if *amount == Money::from_whole(100)));
}

#[tokio::test]
async fn large_refunds_require_a_second_person() {
    let db = new_db().await;
    seed_order(&db, "ord-201", 1000).await;
    let gateway = MockGateway::new();
    let api = api(&db, &gateway);

    let refund = api.request(&OrderId::from("ord-201"), Money::from_whole(600), &finance("alice")).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Pending);
    assert_eq!(refund.requested_by, "alice");
    assert_eq!(gateway.call_count(), 0);

    // The requester cannot approve their own request.
    let err = api.approve(refund.id, &finance("alice")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::SelfApprovalForbidden));
    assert_eq!(gateway.call_count(), 0);

    gateway.succeed_with("re_456");
    let approved = api.approve(refund.id, &finance("bob")).await.unwrap();
    assert_eq!(approved.status, RefundStatus::Refunded);
    assert_eq!(gateway.call_count(), 1);

    // Both halves of the dual control are on the audit trail.
    let requested =
        db.most_recent_audit_by_action(EntityType::Refund, &refund.id.to_string(), AuditAction::RefundRequested).await.unwrap();
    assert_eq!(requested.unwrap().actor_id, "alice");
    let approved =
        db.most_recent_audit_by_action(EntityType::Refund, &refund.id.to_string(), AuditAction::RefundApproved).await.unwrap();
    assert_eq!(approved.unwrap().actor_id, "bob");
}

#[tokio::test]
async fn a_settled_refund_cannot_be_approved_again() {
    let db = new_db().await;
    seed_order(&db, "ord-202", 1000).await;
    let gateway = MockGateway::new();
    let api = api(&db, &gateway);

    let refund = api.request(&OrderId::from("ord-202"), Money::from_whole(600), &finance("alice")).await.unwrap();
    api.approve(refund.id, &finance("bob")).await.unwrap();

    let err = api.approve(refund.id, &finance("carol")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    // Money moved exactly once.
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn declined_refunds_park_in_failed_and_can_be_retried() {
    let db = new_db().await;
    seed_order(&db, "ord-203", 1000).await;
    let gateway = MockGateway::new();
    gateway.fail_with(GatewayError::Declined("insufficient balance".into()));
    let api = api(&db, &gateway);

    // The request itself succeeds; the failed execution is recorded on the row.
    let refund = api.request(&OrderId::from("ord-203"), Money::from_whole(100), &finance("alice")).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Failed);
    assert_eq!(refund.reason_code.as_deref(), Some("gateway_error"));

    gateway.succeed_with("re_retry");
    let retried = api.retry(refund.id, &finance("alice")).await.unwrap();
    assert_eq!(retried.status, RefundStatus::Refunded);
    assert_eq!(retried.provider_reference.as_deref(), Some("re_retry"));
    assert_eq!(gateway.call_count(), 2);

    let audited =
        db.most_recent_audit_by_action(EntityType::Refund, &refund.id.to_string(), AuditAction::RefundRetried).await.unwrap();
    assert!(audited.is_some());
}

#[tokio::test]
async fn retry_is_only_allowed_from_failed() {
    let db = new_db().await;
    seed_order(&db, "ord-204", 1000).await;
    let gateway = MockGateway::new();
    let api = api(&db, &gateway);

    let refund = api.request(&OrderId::from("ord-204"), Money::from_whole(600), &finance("alice")).await.unwrap();
    let err = api.retry(refund.id, &finance("alice")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn a_gateway_timeout_never_settles_the_refund() {
    let db = new_db().await;
    seed_order(&db, "ord-205", 1000).await;
    let gateway = MockGateway::new();
    gateway.hang();
    let config = WorkflowConfig { gateway_timeout: Duration::from_millis(50), ..WorkflowConfig::default() };
    let api = RefundApi::new(db.clone(), gateway.clone(), config);

    let refund = api.request(&OrderId::from("ord-205"), Money::from_whole(100), &finance("alice")).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Failed);
    assert_eq!(refund.reason_code.as_deref(), Some("gateway_timeout"));
    assert!(refund.provider_reference.is_none());

    // The attempt left a gateway-call trace for forensics.
    let trace = db.most_recent_event_for_order(&OrderId::from("ord-205")).await.unwrap();
    assert!(trace.is_none(), "gateway traces are not webhook events");
}

#[tokio::test]
async fn validation_rejects_bad_amounts() {
    let db = new_db().await;
    seed_order(&db, "ord-206", 100).await;
    let gateway = MockGateway::new();
    let api = api(&db, &gateway);

    let err = api.request(&OrderId::from("ord-206"), Money::from_cents(0), &finance("alice")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ValidationFailure(_)));
    let err = api.request(&OrderId::from("ord-206"), Money::from_whole(101), &finance("alice")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ValidationFailure(_)));
    let err = api.request(&OrderId::from("ord-missing"), Money::from_whole(10), &finance("alice")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn mark_failed_requires_reasons_and_respects_settlement() {
    let db = new_db().await;
    seed_order(&db, "ord-207", 1000).await;
    let gateway = MockGateway::new();
    let api = api(&db, &gateway);

    let refund = api.request(&OrderId::from("ord-207"), Money::from_whole(600), &finance("alice")).await.unwrap();

    let err = api.mark_failed(refund.id, "", "customer withdrew the claim", &finance("bob")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ValidationFailure(_)));

    let failed = api.mark_failed(refund.id, "withdrawn", "customer withdrew the claim", &finance("bob")).await.unwrap();
    assert_eq!(failed.status, RefundStatus::Failed);
    assert_eq!(failed.reason_code.as_deref(), Some("withdrawn"));

    // Settle it, then try to mark it failed again.
    gateway.succeed_with("re_789");
    api.retry(refund.id, &finance("bob")).await.unwrap();
    let err = api.mark_failed(refund.id, "withdrawn", "too late", &finance("bob")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));
}

#[tokio::test]
async fn a_refunded_delivered_order_moves_to_refunded() {
    let db = new_db().await;
    seed_order(&db, "ord-208", 1000).await;
    let actor = finance("alice");
    // Walk the order out to delivered.
    let oid = OrderId::from("ord-208");
    db.transition_order(&oid, OrderStatus::Paid, &actor, None).await.unwrap();
    db.transition_order(&oid, OrderStatus::Packed, &actor, None).await.unwrap();
    db.transition_order(&oid, OrderStatus::Shipped, &actor, None).await.unwrap();
    db.transition_order(&oid, OrderStatus::Delivered, &actor, None).await.unwrap();

    let gateway = MockGateway::new();
    gateway.succeed_with("re_full");
    let api = api(&db, &gateway);
    let refund = api.request(&oid, Money::from_whole(400), &actor).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Refunded);

    let order = db.fetch_order(&oid).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
}
