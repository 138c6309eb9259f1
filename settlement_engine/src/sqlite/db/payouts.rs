use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewPayoutRequest, PayoutRequest, PayoutStatus},
    traits::SettlementDbError,
};

pub async fn insert_payout(
    payout: NewPayoutRequest,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SettlementDbError> {
    let payout = sqlx::query_as(
        r#"
            INSERT INTO payout_requests (order_id, seller_id, amount, currency, requested_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(payout.order_id)
    .bind(payout.seller_id)
    .bind(payout.amount)
    .bind(payout.currency)
    .bind(payout.requested_by)
    .fetch_one(conn)
    .await?;
    Ok(payout)
}

pub async fn fetch_payout(id: i64, conn: &mut SqliteConnection) -> Result<Option<PayoutRequest>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payout_requests WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Compare-and-swap claim, see [`super::refunds::claim_execution`].
pub(crate) async fn claim_execution(
    id: i64,
    allowed_from: &[PayoutStatus],
    conn: &mut SqliteConnection,
) -> Result<Option<PayoutRequest>, SettlementDbError> {
    let mut builder = QueryBuilder::new(
        "UPDATE payout_requests SET status = 'processing', updated_at = CURRENT_TIMESTAMP WHERE id = ",
    );
    builder.push_bind(id);
    builder.push(" AND status IN (");
    let mut statuses = builder.separated(", ");
    for status in allowed_from {
        statuses.push_bind(status.to_string());
    }
    builder.push(") RETURNING *");
    let row =
        builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| PayoutRequest::from_row(&row)).transpose()?;
    Ok(row)
}

pub(crate) async fn settle(
    id: i64,
    provider_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SettlementDbError> {
    let updated: Option<PayoutRequest> = sqlx::query_as(
        r#"
            UPDATE payout_requests SET
                status = 'paid',
                provider_reference = $1,
                paid_at = COALESCE(paid_at, CURRENT_TIMESTAMP),
                failure_reason = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(provider_reference)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| SettlementDbError::ConcurrentUpdate(format!("Payout {id} was not claimed for execution")))
}

pub(crate) async fn fail_execution(
    id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SettlementDbError> {
    let updated: Option<PayoutRequest> = sqlx::query_as(
        r#"
            UPDATE payout_requests SET
                status = 'failed',
                failure_reason = $1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| SettlementDbError::ConcurrentUpdate(format!("Payout {id} was not claimed for execution")))
}

/// Manual settlement after out-of-band confirmation. Returns `false` in the second parameter when
/// the payout was already paid and nothing changed.
pub(crate) async fn mark_paid(
    id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<(PayoutRequest, bool), SettlementDbError> {
    let updated: Option<PayoutRequest> = sqlx::query_as(
        r#"
            UPDATE payout_requests SET
                status = 'paid',
                paid_at = COALESCE(paid_at, CURRENT_TIMESTAMP),
                provider_reference = COALESCE(provider_reference, $1),
                failure_reason = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status != 'paid'
            RETURNING *;
        "#,
    )
    .bind(format!("manual:{reason}"))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(payout) => Ok((payout, true)),
        None => match fetch_payout(id, conn).await? {
            Some(payout) => Ok((payout, false)),
            None => Err(SettlementDbError::PayoutNotFound(id)),
        },
    }
}
