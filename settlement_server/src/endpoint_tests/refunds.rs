use actix_web::{http::StatusCode, test, App};
use settle_common::Money;
use settlement_engine::db_types::{RefundStatus, Role, Roles};

use super::helpers::{configure, issue_token, post_request, seed_order, setup};

#[actix_web::test]
async fn refund_requests_need_a_token() {
    let (db, gateway) = setup().await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let body = serde_json::json!({ "order_id": "ord-r-1", "amount": 1000 });
    let req = post_request(None, "/api/refunds", body).to_request();
    let err = test::try_call_service(&app, req).await.expect_err("Expected the ACL to reject the request");
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn read_only_tokens_cannot_move_money() {
    let (db, gateway) = setup().await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("carol", Roles(vec![Role::ReadOnly]));
    let body = serde_json::json!({ "order_id": "ord-r-1", "amount": 1000 });
    let req = post_request(Some(&token), "/api/refunds", body).to_request();
    let err = test::try_call_service(&app, req).await.expect_err("Expected the ACL to reject the request");
    assert_eq!(err.as_response_error().status_code(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn small_refunds_settle_straight_from_the_endpoint() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-r-2", Money::from_whole(100)).await;
    gateway.succeed_with("re_endpoint_1");
    let app = test::init_service(App::new().configure(configure(db, gateway.clone(), 30))).await;
    let token = issue_token("alice", Roles(vec![Role::Finance]));
    let body = serde_json::json!({ "order_id": "ord-r-2", "amount": 2500 });
    let req = post_request(Some(&token), "/api/refunds", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let refund: serde_json::Value = test::read_body_json(res).await;
    assert_eq!(refund["status"], serde_json::json!(RefundStatus::Refunded));
    assert_eq!(refund["provider_reference"], serde_json::json!("re_endpoint_1"));
    assert_eq!(gateway.call_count(), 1);
}

#[actix_web::test]
async fn super_admin_passes_every_role_check() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-r-3", Money::from_whole(100)).await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("root", Roles(vec![Role::SuperAdmin]));
    let body = serde_json::json!({ "order_id": "ord-r-3", "amount": 1500 });
    let req = post_request(Some(&token), "/api/refunds", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn mutating_endpoints_are_rate_limited_per_actor() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-r-4", Money::from_whole(100)).await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 2))).await;
    let token = issue_token("alice", Roles(vec![Role::Finance]));
    for _ in 0..2 {
        let body = serde_json::json!({ "order_id": "ord-r-4", "amount": 100 });
        let req = post_request(Some(&token), "/api/refunds", body).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    let body = serde_json::json!({ "order_id": "ord-r-4", "amount": 100 });
    let req = post_request(Some(&token), "/api/refunds", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().get("Retry-After").is_some());
}

#[actix_web::test]
async fn validation_failures_surface_as_400() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-r-5", Money::from_whole(100)).await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("alice", Roles(vec![Role::Finance]));
    let body = serde_json::json!({ "order_id": "ord-r-5", "amount": -50 });
    let req = post_request(Some(&token), "/api/refunds", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
