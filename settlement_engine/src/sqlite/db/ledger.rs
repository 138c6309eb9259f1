use log::debug;
use settle_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{EntityType, LedgerEntry},
    traits::SettlementDbError,
};

pub async fn fetch_for_entity(
    entity_type: EntityType,
    entity_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM ledger_entries WHERE entity_type = $1 AND entity_id = $2")
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(conn)
        .await
}

/// Inserts a ledger row unless one already exists for the entity. The `(entity_type, entity_id)`
/// unique constraint carries the idempotence; a second call is a silent no-op and returns `false`.
pub(crate) async fn insert_if_absent(
    entity_type: EntityType,
    entity_id: &str,
    amount: Money,
    memo: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<bool, SettlementDbError> {
    let result = sqlx::query(
        r#"
            INSERT OR IGNORE INTO ledger_entries (entity_type, entity_id, amount, memo)
            VALUES ($1, $2, $3, $4);
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(amount)
    .bind(memo)
    .execute(conn)
    .await?;
    let inserted = result.rows_affected() > 0;
    if inserted {
        debug!("🏦️ Ledger entry recorded for {entity_type} {entity_id}: {amount}");
    }
    Ok(inserted)
}
