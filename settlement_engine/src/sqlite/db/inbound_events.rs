use sqlx::SqliteConnection;

use crate::{
    db_types::{InboundEvent, NewInboundEvent, OrderId},
    traits::SettlementDbError,
};

pub async fn insert_event(
    event: NewInboundEvent,
    conn: &mut SqliteConnection,
) -> Result<InboundEvent, SettlementDbError> {
    let event = sqlx::query_as(
        r#"
            INSERT INTO inbound_events (source, event_id, order_id, payload, result, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(event.source)
    .bind(event.event_id)
    .bind(event.order_id)
    .bind(event.payload)
    .bind(event.result)
    .bind(event.message)
    .fetch_one(conn)
    .await?;
    Ok(event)
}

pub async fn fetch_event(id: i64, conn: &mut SqliteConnection) -> Result<Option<InboundEvent>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM inbound_events WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// The most recent webhook delivery for an order, used by reconciliation. Gateway-call traces and
/// earlier replays are skipped so a reconcile always re-evaluates provider truth.
pub async fn most_recent_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<InboundEvent>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM inbound_events
            WHERE order_id = $1 AND source = 'webhook'
            ORDER BY received_at DESC, id DESC
            LIMIT 1;
        "#,
    )
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await
}
