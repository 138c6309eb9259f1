use std::time::Duration;

use actix_web::{
    test::TestRequest,
    web::{self, ServiceConfig},
};
use settle_common::{Money, Secret};
use settlement_engine::{
    db_types::{NewOrder, Order, OrderId, Roles},
    test_utils::{
        mock_gateway::MockGateway,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::SettlementDatabase,
    AuditApi,
    InMemoryStore,
    PaymentEventApi,
    PayoutApi,
    RateLimiter,
    RefundApi,
    SqliteDatabase,
    WorkflowConfig,
};

use crate::{
    auth::TokenIssuer,
    config::AuthConfig,
    routes::{
        health,
        ApprovePayoutRoute,
        ApproveRefundRoute,
        MarkOrderPaidRoute,
        MarkPayoutPaidRoute,
        MarkRefundFailedRoute,
        NewPayoutRoute,
        NewRefundRoute,
        OrderAuditRoute,
        OrderByIdRoute,
        PaymentWebhookRoute,
        ReconcileOrderRoute,
        ReplayEventRoute,
        RetryRefundRoute,
    },
};

// Test-only signing secret. DO NOT re-use anywhere.
pub fn auth_config() -> AuthConfig {
    AuthConfig { jwt_secret: Secret::new("endpoint-test-secret".to_string()) }
}

pub fn issue_token(actor_id: &str, roles: Roles) -> String {
    TokenIssuer::new(&auth_config()).issue_token(actor_id, roles, None).unwrap()
}

pub async fn setup() -> (SqliteDatabase, MockGateway) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.unwrap();
    (db, MockGateway::new())
}

pub async fn seed_order(db: &SqliteDatabase, order_id: &str, total: Money) -> Order {
    let order = NewOrder::new(OrderId::from(order_id), "buyer-1".into(), "seller-1".into(), total);
    let (order, _) = db.insert_order(order).await.unwrap();
    order
}

/// Wires up the full route table against a test database and mock gateway, mirroring
/// [`crate::server::create_server_instance`].
pub fn configure(
    db: SqliteDatabase,
    gateway: MockGateway,
    rate_limit_max: u32,
) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let workflow =
            WorkflowConfig { large_refund_threshold: Money::from_whole(500), gateway_timeout: Duration::from_secs(5) };
        cfg.app_data(web::Data::new(auth_config()))
            .app_data(web::Data::new(RateLimiter::new(InMemoryStore::new(), rate_limit_max, Duration::from_secs(60))))
            .app_data(web::Data::new(PaymentEventApi::new(db.clone())))
            .app_data(web::Data::new(RefundApi::new(db.clone(), gateway.clone(), workflow.clone())))
            .app_data(web::Data::new(PayoutApi::new(db.clone(), gateway, workflow)))
            .app_data(web::Data::new(AuditApi::new(db)))
            .service(health)
            .service(web::scope("/webhook").service(PaymentWebhookRoute::<SqliteDatabase>::new()))
            .service(
                web::scope("/api")
                    .service(NewRefundRoute::<SqliteDatabase, MockGateway>::new())
                    .service(ApproveRefundRoute::<SqliteDatabase, MockGateway>::new())
                    .service(RetryRefundRoute::<SqliteDatabase, MockGateway>::new())
                    .service(MarkRefundFailedRoute::<SqliteDatabase, MockGateway>::new())
                    .service(NewPayoutRoute::<SqliteDatabase, MockGateway>::new())
                    .service(ApprovePayoutRoute::<SqliteDatabase, MockGateway>::new())
                    .service(MarkPayoutPaidRoute::<SqliteDatabase, MockGateway>::new())
                    .service(ReplayEventRoute::<SqliteDatabase>::new())
                    .service(ReconcileOrderRoute::<SqliteDatabase>::new())
                    .service(MarkOrderPaidRoute::<SqliteDatabase>::new())
                    .service(OrderAuditRoute::<SqliteDatabase>::new())
                    .service(OrderByIdRoute::<SqliteDatabase>::new()),
            );
    }
}

pub fn get_request(token: Option<&str>, path: &str) -> TestRequest {
    let mut req = TestRequest::get().uri(path);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {token}")));
    }
    req
}

pub fn post_request(token: Option<&str>, path: &str, body: serde_json::Value) -> TestRequest {
    let mut req = TestRequest::post().uri(path).set_json(body);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {token}")));
    }
    req
}
