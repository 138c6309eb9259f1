//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Any long, non-cpu-bound operation (I/O, database queries, gateway
//! calls) must therefore be expressed as futures or asynchronous functions, which get executed concurrently by the
//! worker threads.

use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use settlement_engine::{
    db_types::{EntityType, OrderId, PaymentEvent, Role},
    traits::{SettlementDatabase, SettlementGateway},
    AuditApi,
    InMemoryStore,
    PaymentEventApi,
    PayoutApi,
    RateLimiter,
    RefundApi,
    WorkflowError,
};

use crate::{
    auth::JwtClaims,
    data_objects::{JsonResponse, MarkFailedParams, NewPayoutParams, NewRefundParams, ReasonParams},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where requires [$($roles:ty),*])  => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhook  ----------------------------------------------------
route!(payment_webhook => Post "/payment" impl SettlementDatabase);
/// The payment provider's notification endpoint.
///
/// Returns 200 with a `{success, message}` body for any delivery the processor could evaluate:
/// the provider retries any non-2xx response, and there is nothing a retry can do about a
/// malformed or unknown-order event that the stored trace record doesn't already cover. A storage
/// failure is the one case that gets a 5xx, so the provider keeps the delivery and tries again.
pub async fn payment_webhook<B: SettlementDatabase + 'static>(
    api: web::Data<PaymentEventApi<B>>,
    body: web::Json<PaymentEvent>,
) -> HttpResponse {
    let event = body.into_inner();
    debug!("💻️ Webhook delivery [{}] for order {}", event.event_id, event.order_id);
    match api.process(&event).await {
        Ok(outcome) if outcome.applied => {
            HttpResponse::Ok().json(JsonResponse::success(format!("Event {} applied", event.event_id)))
        },
        Ok(_) => HttpResponse::Ok().json(JsonResponse::success(format!("Event {} was a no-op", event.event_id))),
        Err(e) => {
            error!("💻️ Webhook delivery [{}] was not processed and must be redelivered. {e}", event.event_id);
            HttpResponse::InternalServerError().json(JsonResponse::failure(e.to_string()))
        },
    }
}

//----------------------------------------------   Refunds  ----------------------------------------------------
route!(new_refund => Post "/refunds" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn new_refund<B, G>(
    claims: JwtClaims,
    api: web::Data<RefundApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
    body: web::Json<NewRefundParams>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("refund_request", &claims.sub)?;
    let params = body.into_inner();
    debug!("💻️ POST refund of {} for order {} by {}", params.amount, params.order_id, claims.sub);
    let refund = api.request(&params.order_id, params.amount, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(refund))
}

route!(approve_refund => Post "/refunds/{id}/approve" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn approve_refund<B, G>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<RefundApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("refund_approve", &claims.sub)?;
    let id = path.into_inner();
    debug!("💻️ POST approve refund #{id} by {}", claims.sub);
    let refund = api.approve(id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(refund))
}

route!(retry_refund => Post "/refunds/{id}/retry" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn retry_refund<B, G>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<RefundApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("refund_retry", &claims.sub)?;
    let id = path.into_inner();
    debug!("💻️ POST retry refund #{id} by {}", claims.sub);
    let refund = api.retry(id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(refund))
}

route!(mark_refund_failed => Post "/refunds/{id}/mark_failed" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn mark_refund_failed<B, G>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<RefundApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
    body: web::Json<MarkFailedParams>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("refund_mark_failed", &claims.sub)?;
    let id = path.into_inner();
    let params = body.into_inner();
    debug!("💻️ POST mark refund #{id} failed by {}", claims.sub);
    let refund = api.mark_failed(id, &params.reason_code, &params.reason, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(refund))
}

//----------------------------------------------   Payouts  ----------------------------------------------------
route!(new_payout => Post "/payouts" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn new_payout<B, G>(
    claims: JwtClaims,
    api: web::Data<PayoutApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
    body: web::Json<NewPayoutParams>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("payout_request", &claims.sub)?;
    let params = body.into_inner();
    debug!("💻️ POST payout of {} for order {} by {}", params.amount, params.order_id, claims.sub);
    let payout = api.request(&params.order_id, params.amount, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(approve_payout => Post "/payouts/{id}/approve" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn approve_payout<B, G>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<PayoutApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("payout_approve", &claims.sub)?;
    let id = path.into_inner();
    debug!("💻️ POST approve payout #{id} by {}", claims.sub);
    let payout = api.approve(id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(mark_payout_paid => Post "/payouts/{id}/mark_paid" impl SettlementDatabase, SettlementGateway where requires [Role::Finance]);
pub async fn mark_payout_paid<B, G>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<PayoutApi<B, G>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
    body: web::Json<ReasonParams>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + 'static,
    G: SettlementGateway + 'static,
{
    limiter.check("payout_mark_paid", &claims.sub)?;
    let id = path.into_inner();
    debug!("💻️ POST mark payout #{id} paid by {}", claims.sub);
    let payout = api.mark_paid(id, &body.reason, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(payout))
}

//----------------------------------------------   Events & orders  --------------------------------------------
route!(replay_event => Post "/events/{id}/replay" impl SettlementDatabase where requires [Role::Admin]);
pub async fn replay_event<B: SettlementDatabase + 'static>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<PaymentEventApi<B>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
) -> Result<HttpResponse, ServerError> {
    limiter.check("event_replay", &claims.sub)?;
    let id = path.into_inner();
    debug!("💻️ POST replay event #{id} by {}", claims.sub);
    let outcome = api.replay(id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(reconcile_order => Post "/orders/{id}/reconcile" impl SettlementDatabase where requires [Role::Admin]);
pub async fn reconcile_order<B: SettlementDatabase + 'static>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<PaymentEventApi<B>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
) -> Result<HttpResponse, ServerError> {
    limiter.check("order_reconcile", &claims.sub)?;
    let order_id = OrderId::from(path.into_inner());
    debug!("💻️ POST reconcile order {order_id} by {}", claims.sub);
    let outcome = api.reconcile(&order_id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(mark_order_paid => Post "/orders/{id}/mark_paid" impl SettlementDatabase where requires [Role::Admin]);
pub async fn mark_order_paid<B: SettlementDatabase + 'static>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<PaymentEventApi<B>>,
    limiter: web::Data<RateLimiter<InMemoryStore>>,
    body: web::Json<ReasonParams>,
) -> Result<HttpResponse, ServerError> {
    limiter.check("order_mark_paid", &claims.sub)?;
    let order_id = OrderId::from(path.into_inner());
    debug!("💻️ POST mark order {order_id} paid by {}", claims.sub);
    let outcome = api.mark_order_paid(&order_id, &body.reason, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(order_by_id => Get "/orders/{id}" impl SettlementDatabase where requires [Role::ReadOnly]);
pub async fn order_by_id<B: SettlementDatabase + 'static>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<PaymentEventApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path.into_inner());
    debug!("💻️ GET order {order_id} for {}", claims.sub);
    let order = api
        .db()
        .fetch_order(&order_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Order {order_id} does not exist")))?;
    Ok(HttpResponse::Ok().json(order))
}

route!(order_audit => Get "/orders/{id}/audit" impl SettlementDatabase where requires [Role::ReadOnly]);
pub async fn order_audit<B: SettlementDatabase + 'static>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<AuditApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET audit trail for order {order_id} for {}", claims.sub);
    let history = api.history(EntityType::Order, &order_id).await?;
    Ok(HttpResponse::Ok().json(history))
}
