use sqlx::SqliteConnection;

use crate::{
    db_types::{AuditAction, AuditLogEntry, EntityType, NewAuditEntry},
    traits::SettlementDbError,
};

/// Appends an entry to the audit log. The table is append-only; there are no update or delete
/// queries against it anywhere in the crate.
pub async fn insert_entry(
    entry: NewAuditEntry,
    conn: &mut SqliteConnection,
) -> Result<AuditLogEntry, SettlementDbError> {
    let meta = entry.meta.map(|m| m.to_string());
    let entry = sqlx::query_as(
        r#"
            INSERT INTO audit_log (actor_id, actor_role, action, entity_type, entity_id, message, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(entry.actor_id)
    .bind(entry.actor_role)
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.message)
    .bind(meta)
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

pub async fn most_recent_by_action(
    entity_type: EntityType,
    entity_id: &str,
    action: AuditAction,
    conn: &mut SqliteConnection,
) -> Result<Option<AuditLogEntry>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM audit_log
            WHERE entity_type = $1 AND entity_id = $2 AND action = $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1;
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(action)
    .fetch_optional(conn)
    .await
}

pub async fn history(
    entity_type: EntityType,
    entity_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM audit_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at ASC, id ASC;
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(conn)
    .await
}
