use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use gateway_client::GatewayApi;
use settlement_engine::{
    AuditApi,
    InMemoryStore,
    PaymentEventApi,
    PayoutApi,
    RateLimiter,
    RefundApi,
    SqliteDatabase,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
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

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let srv = create_server_instance(config, db)?;
    Ok(srv.await?)
}

pub fn create_server_instance(config: ServerConfig, db: SqliteDatabase) -> Result<Server, ServerError> {
    let gateway = GatewayApi::new(config.gateway.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    // One shared counter store for every worker. Building the limiter inside the factory closure
    // would give each worker its own counters and multiply the effective rate.
    let rate_limiter =
        web::Data::new(RateLimiter::new(InMemoryStore::new(), config.rate_limit_max, config.rate_limit_window));
    let workflow = config.workflow_config();
    let auth = config.auth.clone();
    let srv = HttpServer::new(move || {
        let events_api = PaymentEventApi::new(db.clone());
        let refunds_api = RefundApi::new(db.clone(), gateway.clone(), workflow.clone());
        let payouts_api = PayoutApi::new(db.clone(), gateway.clone(), workflow.clone());
        let audit_api = AuditApi::new(db.clone());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("ssc::access_log"))
            .app_data(web::Data::new(auth.clone()))
            .app_data(web::Data::new(events_api))
            .app_data(web::Data::new(refunds_api))
            .app_data(web::Data::new(payouts_api))
            .app_data(web::Data::new(audit_api))
            .app_data(rate_limiter.clone());
        // The provider's notification endpoint; the provider authenticates upstream of this server.
        let webhook_scope = web::scope("/webhook").service(PaymentWebhookRoute::<SqliteDatabase>::new());
        // Routes that require authentication
        let api_scope = web::scope("/api")
            .service(NewRefundRoute::<SqliteDatabase, GatewayApi>::new())
            .service(ApproveRefundRoute::<SqliteDatabase, GatewayApi>::new())
            .service(RetryRefundRoute::<SqliteDatabase, GatewayApi>::new())
            .service(MarkRefundFailedRoute::<SqliteDatabase, GatewayApi>::new())
            .service(NewPayoutRoute::<SqliteDatabase, GatewayApi>::new())
            .service(ApprovePayoutRoute::<SqliteDatabase, GatewayApi>::new())
            .service(MarkPayoutPaidRoute::<SqliteDatabase, GatewayApi>::new())
            .service(ReplayEventRoute::<SqliteDatabase>::new())
            .service(ReconcileOrderRoute::<SqliteDatabase>::new())
            .service(MarkOrderPaidRoute::<SqliteDatabase>::new())
            .service(OrderAuditRoute::<SqliteDatabase>::new())
            .service(OrderByIdRoute::<SqliteDatabase>::new());
        app.service(health).service(webhook_scope).service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
