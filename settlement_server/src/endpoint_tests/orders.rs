use actix_web::{http::StatusCode, test, App};
use settle_common::Money;
use settlement_engine::db_types::{Role, Roles};

use super::helpers::{configure, get_request, issue_token, post_request, seed_order, setup};

#[actix_web::test]
async fn order_lookup_returns_the_order() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-o-1", Money::from_whole(120)).await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("dave", Roles(vec![Role::ReadOnly]));
    let req = get_request(Some(&token), "/api/orders/ord-o-1").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let order: serde_json::Value = test::read_body_json(res).await;
    assert_eq!(order["order_id"], "ord-o-1");
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total"], 12000);
}

#[actix_web::test]
async fn unknown_orders_return_404() {
    let (db, gateway) = setup().await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("dave", Roles(vec![Role::ReadOnly]));
    let req = get_request(Some(&token), "/api/orders/no-such-order").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn the_audit_trail_is_readable_over_http() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-o-2", Money::from_whole(60)).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway, 30))).await;
    let admin = issue_token("erin", Roles(vec![Role::Admin, Role::ReadOnly]));
    let body = serde_json::json!({ "reason": "bank transfer confirmed out of band" });
    let req = post_request(Some(&admin), "/api/orders/ord-o-2/mark_paid", body).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let req = get_request(Some(&admin), "/api/orders/ord-o-2/audit").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let entries: serde_json::Value = test::read_body_json(res).await;
    let entries = entries.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().any(|e| e["action"] == "order_marked_paid"));
}

#[actix_web::test]
async fn mark_paid_requires_the_admin_role() {
    let (db, gateway) = setup().await;
    seed_order(&db, "ord-o-3", Money::from_whole(60)).await;
    let app = test::init_service(App::new().configure(configure(db, gateway, 30))).await;
    let token = issue_token("alice", Roles(vec![Role::Finance]));
    let body = serde_json::json!({ "reason": "bank transfer confirmed out of band" });
    let req = post_request(Some(&token), "/api/orders/ord-o-3/mark_paid", body).to_request();
    let err = test::try_call_service(&app, req).await.expect_err("Expected the ACL to reject the request");
    assert_eq!(err.as_response_error().status_code(), StatusCode::FORBIDDEN);
}
