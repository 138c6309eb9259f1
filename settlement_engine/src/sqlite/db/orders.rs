use chrono::Utc;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    api::payment_events::EventPlan,
    db_types::{NewOrder, Order, OrderId, OrderStatus},
    traits::SettlementDbError,
};

/// Inserts the order into the database, returning `false` in the second parameter if the order
/// already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), SettlementDbError> {
    let inserted = match fetch_order_by_order_id(&order.order_id, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("🗃️ Order [{}] inserted with id {}", order.order_id, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SettlementDbError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_id, buyer_id, seller_id, total, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.buyer_id)
    .bind(order.seller_id)
    .bind(order.total)
    .bind(order.currency)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Applies an evaluated event plan to the order row in one version-guarded write. `paid_at` is
/// protected by COALESCE so it can never be cleared or overwritten, and an absent reference bind
/// keeps whatever is stored.
pub(crate) async fn apply_event_plan(
    order: &Order,
    plan: &EventPlan,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementDbError> {
    let paid_at = plan.set_paid_at.then(Utc::now);
    let updated: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = $1,
                paid_at = COALESCE(paid_at, $2),
                payment_reference = COALESCE($3, payment_reference),
                version = version + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $4 AND version = $5
            RETURNING *;
        "#,
    )
    .bind(plan.next_status)
    .bind(paid_at)
    .bind(plan.new_payment_reference.as_deref())
    .bind(order.id)
    .bind(order.version)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| {
        SettlementDbError::ConcurrentUpdate(format!("Order {} changed while the event was being applied", order.order_id))
    })
}

/// Version-guarded status write for administrative transitions. The caller must have validated
/// the edge through the state machine already.
pub(crate) async fn update_order_status(
    order: &Order,
    status: OrderStatus,
    cancel_reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementDbError> {
    let updated: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = $1,
                cancel_reason = COALESCE($2, cancel_reason),
                version = version + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND version = $4
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(cancel_reason)
    .bind(order.id)
    .bind(order.version)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| {
        SettlementDbError::ConcurrentUpdate(format!("Order {} changed while the status was being updated", order.order_id))
    })
}
