use settle_common::Money;
use settlement_engine::{
    db_types::*,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    traits::SettlementDatabase,
    PaymentEventApi,
    SqliteDatabase,
    WorkflowError,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

fn admin() -> Actor {
    Actor::new("alice", Role::Admin)
}

async fn seed_order(db: &SqliteDatabase, order_id: &str, total: i64) -> Order {
    let order = NewOrder::new(OrderId::from(order_id), "buyer-1".into(), "seller-1".into(), Money::from_whole(total));
    let (order, created) = db.insert_order(order).await.expect("Error inserting order");
    assert!(created);
    order
}

fn paid_event(order_id: &str, event_id: &str, reference: Option<&str>) -> PaymentEvent {
    PaymentEvent {
        order_id: OrderId::from(order_id),
        status: MappedStatus::Paid,
        amount: Money::from_whole(100),
        currency: "EUR".into(),
        event_id: event_id.into(),
        provider_reference: reference.map(String::from),
        manual_capture: false,
    }
}

fn failed_event(order_id: &str, event_id: &str) -> PaymentEvent {
    PaymentEvent { status: MappedStatus::Failed, ..paid_event(order_id, event_id, None) }
}

#[tokio::test]
async fn duplicate_deliveries_are_idempotent() {
    let db = new_db().await;
    seed_order(&db, "ord-100", 100).await;
    let api = PaymentEventApi::new(db.clone());

    let first = api.process(&paid_event("ord-100", "evt-1", Some("pi_abc"))).await.unwrap();
    assert!(first.applied);
    assert_eq!(first.previous_status, Some(OrderStatus::Pending));
    assert_eq!(first.current_status, Some(OrderStatus::Paid));
    assert!(first.set_paid_at);

    let order = db.fetch_order(&OrderId::from("ord-100")).await.unwrap().unwrap();
    let paid_at = order.paid_at.expect("paid_at should be set");
    assert_eq!(order.payment_reference.as_deref(), Some("pi_abc"));

    // The provider retries the exact same delivery.
    let second = api.process(&paid_event("ord-100", "evt-1", Some("pi_abc"))).await.unwrap();
    assert!(!second.applied);
    assert_eq!(second.current_status, Some(OrderStatus::Paid));

    let order = db.fetch_order(&OrderId::from("ord-100")).await.unwrap().unwrap();
    assert_eq!(order.paid_at, Some(paid_at));

    // Only the delivery that moved the status was audited.
    let history = db.audit_history(EntityType::Order, "ord-100").await.unwrap();
    let status_changes = history.iter().filter(|e| e.action == AuditAction::OrderStatusChanged).count();
    assert_eq!(status_changes, 1);
}

#[tokio::test]
async fn failure_after_payment_never_reverts_the_order() {
    let db = new_db().await;
    seed_order(&db, "ord-101", 100).await;
    let api = PaymentEventApi::new(db.clone());

    api.process(&paid_event("ord-101", "evt-1", Some("pi_abc"))).await.unwrap();
    // A stale failure notification arrives out of order.
    let outcome = api.process(&failed_event("ord-101", "evt-0")).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.current_status, Some(OrderStatus::Paid));
}

#[tokio::test]
async fn failed_order_recovers_on_a_later_payment() {
    let db = new_db().await;
    seed_order(&db, "ord-102", 100).await;
    let api = PaymentEventApi::new(db.clone());

    let parked = api.process(&failed_event("ord-102", "evt-1")).await.unwrap();
    assert_eq!(parked.current_status, Some(OrderStatus::Failed));

    let recovered = api.process(&paid_event("ord-102", "evt-2", Some("pi_retry"))).await.unwrap();
    assert!(recovered.applied);
    assert_eq!(recovered.current_status, Some(OrderStatus::Paid));
    assert!(recovered.set_paid_at);
}

#[tokio::test]
async fn racing_deliveries_all_land_in_the_delivery_log() {
    let db = new_db().await;
    seed_order(&db, "ord-107", 100).await;
    let api = PaymentEventApi::new(db.clone());

    // Two pool connections process conflicting notifications for the same order at once. The
    // loser of the version race re-reads the row and re-evaluates against the fresh status.
    let paid = paid_event("ord-107", "evt-race-paid", Some("pi_race"));
    let failed = failed_event("ord-107", "evt-race-failed");
    let (a, b) = tokio::join!(api.process(&paid), api.process(&failed));
    a.unwrap();
    b.unwrap();

    // In either application order, a paid order stays paid.
    let order = db.fetch_order(&OrderId::from("ord-107")).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_reference.as_deref(), Some("pi_race"));

    // Both deliveries must be in the log, acknowledged or not.
    let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbound_events WHERE order_id = $1")
        .bind("ord-107")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(logged, 2);
}

#[tokio::test]
async fn unknown_orders_are_recorded_but_not_applied() {
    let db = new_db().await;
    let api = PaymentEventApi::new(db.clone());

    let outcome = api.process(&paid_event("ord-missing", "evt-1", None)).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.previous_status, None);

    // The delivery still left a trace for later replay.
    let trace = db.most_recent_event_for_order(&OrderId::from("ord-missing")).await.unwrap().unwrap();
    assert_eq!(trace.event_id, "evt-1");
    assert_eq!(trace.result, EventResult::Error);
}

#[tokio::test]
async fn replay_reapplies_a_stored_event() {
    let db = new_db().await;
    seed_order(&db, "ord-103", 100).await;
    let api = PaymentEventApi::new(db.clone());

    api.process(&paid_event("ord-103", "evt-1", Some("pi_abc"))).await.unwrap();
    let stored = db.most_recent_event_for_order(&OrderId::from("ord-103")).await.unwrap().unwrap();

    let outcome = api.replay(stored.id, &admin()).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.current_status, Some(OrderStatus::Paid));

    let replayed = db.most_recent_audit_by_action(EntityType::Order, "ord-103", AuditAction::EventReplayed).await.unwrap();
    assert!(replayed.is_some());
}

#[tokio::test]
async fn reconcile_uses_the_most_recent_stored_event() {
    let db = new_db().await;
    seed_order(&db, "ord-104", 100).await;
    let api = PaymentEventApi::new(db.clone());

    api.process(&paid_event("ord-104", "evt-1", Some("pi_abc"))).await.unwrap();
    let outcome = api.reconcile(&OrderId::from("ord-104"), &admin()).await.unwrap();
    assert!(!outcome.applied);

    let audited =
        db.most_recent_audit_by_action(EntityType::Order, "ord-104", AuditAction::OrderReconciled).await.unwrap();
    assert!(audited.is_some());

    let err = api.reconcile(&OrderId::from("ord-none"), &admin()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn manual_mark_paid_is_audited_and_guarded() {
    let db = new_db().await;
    seed_order(&db, "ord-105", 100).await;
    let api = PaymentEventApi::new(db.clone());

    let err = api.mark_order_paid(&OrderId::from("ord-105"), "  ", &admin()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ValidationFailure(_)));

    let outcome = api.mark_order_paid(&OrderId::from("ord-105"), "bank transfer received", &admin()).await.unwrap();
    assert_eq!(outcome.current_status, Some(OrderStatus::Paid));

    let order = db.fetch_order(&OrderId::from("ord-105")).await.unwrap().unwrap();
    assert_eq!(order.payment_reference.as_deref(), Some("manual:alice"));
    assert!(order.paid_at.is_some());

    let audited =
        db.most_recent_audit_by_action(EntityType::Order, "ord-105", AuditAction::OrderMarkedPaid).await.unwrap();
    assert_eq!(audited.unwrap().message.as_deref(), Some("bank transfer received"));

    // Already paid, so a second manual override is rejected.
    let err = api.mark_order_paid(&OrderId::from("ord-105"), "double entry", &admin()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));
}

#[tokio::test]
async fn a_real_reference_replaces_the_manual_placeholder() {
    let db = new_db().await;
    seed_order(&db, "ord-106", 100).await;
    let api = PaymentEventApi::new(db.clone());

    api.mark_order_paid(&OrderId::from("ord-106"), "manual capture on dashboard", &admin()).await.unwrap();
    // The provider's own notification for the capture arrives later.
    api.process(&paid_event("ord-106", "evt-9", Some("pi_real"))).await.unwrap();

    let order = db.fetch_order(&OrderId::from("ord-106")).await.unwrap().unwrap();
    assert_eq!(order.payment_reference.as_deref(), Some("pi_real"));
}
