use actix_web::{http::StatusCode, test, App};
use settle_common::Money;
use settlement_engine::{
    db_types::{OrderId, OrderStatus},
    traits::SettlementDatabase,
};

use super::helpers::{configure, post_request, seed_order, setup};
use crate::data_objects::JsonResponse;

#[actix_web::test]
async fn health_check_needs_no_token() {
    let (db, gateway) = setup().await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn webhook_deliveries_need_no_token_and_move_the_order() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-wh-1", Money::from_whole(100)).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway, 30))).await;
    let body = serde_json::json!({
        "order_id": "ord-wh-1",
        "status": "paid",
        "amount": 10000,
        "currency": "EUR",
        "event_id": "evt-wh-1",
        "provider_reference": "pi_wh_1",
    });
    let req = post_request(None, "/webhook/payment", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let response: JsonResponse = test::read_body_json(res).await;
    assert!(response.success);
    let order = db.fetch_order(&OrderId::from("ord-wh-1")).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_reference.as_deref(), Some("pi_wh_1"));
}

#[actix_web::test]
async fn webhook_returns_200_even_for_unknown_orders() {
    let (db, gateway) = setup().await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let body = serde_json::json!({
        "order_id": "no-such-order",
        "status": "paid",
        "amount": 500,
        "currency": "EUR",
        "event_id": "evt-wh-2",
        "provider_reference": null,
    });
    let req = post_request(None, "/webhook/payment", body).to_request();
    let res = test::call_service(&app, req).await;
    // The provider retries non-2xx responses forever; an unknown order is recorded, not rejected.
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn storage_failures_ask_the_provider_to_redeliver() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-wh-9", Money::from_whole(100)).await;
    let mut handle = db.clone();
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    // Pools are shared between clones, so this takes the app's storage down.
    handle.close().await.unwrap();
    let body = serde_json::json!({
        "order_id": "ord-wh-9",
        "status": "paid",
        "amount": 10000,
        "currency": "EUR",
        "event_id": "evt-wh-9",
        "provider_reference": "pi_wh_9",
    });
    let req = post_request(None, "/webhook/payment", body).to_request();
    let res = test::call_service(&app, req).await;
    // A delivery that could not be persisted must not be acknowledged.
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let response: JsonResponse = test::read_body_json(res).await;
    assert!(!response.success);
}
