use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewRefundRequest, RefundRequest, RefundStatus},
    traits::SettlementDbError,
};

pub async fn insert_refund(
    refund: NewRefundRequest,
    conn: &mut SqliteConnection,
) -> Result<RefundRequest, SettlementDbError> {
    let refund = sqlx::query_as(
        r#"
            INSERT INTO refund_requests (order_id, amount, currency, requested_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(refund.order_id)
    .bind(refund.amount)
    .bind(refund.currency)
    .bind(refund.requested_by)
    .fetch_one(conn)
    .await?;
    Ok(refund)
}

pub async fn fetch_refund(id: i64, conn: &mut SqliteConnection) -> Result<Option<RefundRequest>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refund_requests WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Compare-and-swap claim: `allowed_from -> processing`. Returns `None` when the row was not in
/// an allowed status, which is how a lost race against a concurrent approval shows up.
pub(crate) async fn claim_execution(
    id: i64,
    allowed_from: &[RefundStatus],
    conn: &mut SqliteConnection,
) -> Result<Option<RefundRequest>, SettlementDbError> {
    let mut builder = QueryBuilder::new(
        "UPDATE refund_requests SET status = 'processing', updated_at = CURRENT_TIMESTAMP WHERE id = ",
    );
    builder.push_bind(id);
    builder.push(" AND status IN (");
    let mut statuses = builder.separated(", ");
    for status in allowed_from {
        statuses.push_bind(status.to_string());
    }
    builder.push(") RETURNING *");
    let row = builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| RefundRequest::from_row(&row)).transpose()?;
    Ok(row)
}

/// Settles a claimed refund. Guarded on `processing` so a stray double-completion cannot happen.
pub(crate) async fn settle(
    id: i64,
    provider_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<RefundRequest, SettlementDbError> {
    let updated: Option<RefundRequest> = sqlx::query_as(
        r#"
            UPDATE refund_requests SET
                status = 'refunded',
                provider_reference = $1,
                failure_reason = NULL,
                reason_code = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(provider_reference)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| SettlementDbError::ConcurrentUpdate(format!("Refund {id} was not claimed for execution")))
}

/// Parks a claimed refund in `failed` after an unsuccessful gateway attempt.
pub(crate) async fn fail_execution(
    id: i64,
    reason_code: Option<&str>,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<RefundRequest, SettlementDbError> {
    let updated: Option<RefundRequest> = sqlx::query_as(
        r#"
            UPDATE refund_requests SET
                status = 'failed',
                reason_code = $1,
                failure_reason = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(reason_code)
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| SettlementDbError::ConcurrentUpdate(format!("Refund {id} was not claimed for execution")))
}

/// Manual failure override. Refunds that have already settled are left untouched.
pub(crate) async fn mark_failed(
    id: i64,
    reason_code: &str,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<RefundRequest, SettlementDbError> {
    let updated: Option<RefundRequest> = sqlx::query_as(
        r#"
            UPDATE refund_requests SET
                status = 'failed',
                reason_code = $1,
                failure_reason = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND status != 'refunded'
            RETURNING *;
        "#,
    )
    .bind(reason_code)
    .bind(reason)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(refund) => Ok(refund),
        None => match fetch_refund(id, conn).await? {
            Some(_) => Err(SettlementDbError::RefundAlreadySettled(id)),
            None => Err(SettlementDbError::RefundNotFound(id)),
        },
    }
}
