//! The audit trail is the sole source of historical truth for state-changing actions. Entries
//! are appended before a caller sees success, and nothing ever updates or deletes one.

use std::fmt::Debug;

use crate::{
    api::errors::WorkflowError,
    db_types::{AuditAction, AuditLogEntry, EntityType, NewAuditEntry},
    traits::SettlementDatabase,
};

pub struct AuditApi<B> {
    db: B,
}

impl<B> Debug for AuditApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuditApi")
    }
}

impl<B> AuditApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> AuditApi<B>
where B: SettlementDatabase
{
    pub async fn record(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, WorkflowError> {
        Ok(self.db.record_audit(entry).await?)
    }

    /// The most recent entry with the given action for an entity. The approval workflows keep an
    /// explicit `requested_by` field as their source of truth; this query exists for forensic
    /// reconstruction and for tooling that walks the history.
    pub async fn most_recent_by_action(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: AuditAction,
    ) -> Result<Option<AuditLogEntry>, WorkflowError> {
        Ok(self.db.most_recent_audit_by_action(entity_type, entity_id, action).await?)
    }

    pub async fn history(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        Ok(self.db.audit_history(entity_type, entity_id).await?)
    }
}
