use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::entities::audit_event;
use crate::errors::ServiceError;
use crate::services::{Page, PageRequest};

/// One audit row, written in the same transaction as the change it
/// describes.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub tenant_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub action: &'static str,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: Uuid,
        actor_user_id: Uuid,
        entity_type: &'static str,
        entity_id: Uuid,
        action: &'static str,
    ) -> Self {
        Self {
            tenant_id,
            actor_user_id: Some(actor_user_id),
            entity_type,
            entity_id,
            action,
            before: None,
            after: None,
        }
    }

    pub fn before<T: Serialize>(mut self, snapshot: &T) -> Self {
        self.before = serde_json::to_value(snapshot).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, snapshot: &T) -> Self {
        self.after = serde_json::to_value(snapshot).ok();
        self
    }
}

/// Writes an audit row on `conn`, tagging it with the current request id.
pub async fn record<C: ConnectionTrait>(conn: &C, entry: AuditEntry) -> Result<(), ServiceError> {
    let correlation_id = crate::tracing::current_request_id().map(|rid| rid.as_str().to_string());

    audit_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(entry.tenant_id),
        actor_user_id: Set(entry.actor_user_id),
        entity_type: Set(entry.entity_type.to_string()),
        entity_id: Set(entry.entity_id),
        action: Set(entry.action.to_string()),
        before: Set(entry.before),
        after: Set(entry.after),
        correlation_id: Set(correlation_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        error!(error = %e, entity = entry.entity_type, action = entry.action, "failed to write audit event");
        ServiceError::DatabaseError(e)
    })?;

    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Read side of the audit trail.
#[derive(Clone)]
pub struct AuditService {
    db: Arc<DatabaseConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists audit events newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: AuditFilter,
        page: PageRequest,
    ) -> Result<Page<audit_event::Model>, ServiceError> {
        let mut query = audit_event::Entity::find()
            .filter(audit_event::Column::TenantId.eq(tenant_id))
            .order_by_desc(audit_event::Column::CreatedAt)
            .order_by_desc(audit_event::Column::Id);

        if let Some(entity_type) = filter.entity_type {
            query = query.filter(audit_event::Column::EntityType.eq(entity_type));
        }
        if let Some(entity_id) = filter.entity_id {
            query = query.filter(audit_event::Column::EntityId.eq(entity_id));
        }
        if let Some(actor) = filter.actor_user_id {
            query = query.filter(audit_event::Column::ActorUserId.eq(actor));
        }
        if let Some(action) = filter.action {
            query = query.filter(audit_event::Column::Action.eq(action));
        }
        if let Some(from) = filter.from {
            query = query.filter(audit_event::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(audit_event::Column::CreatedAt.lte(to));
        }

        let paginator = query.paginate(self.db.as_ref(), page.limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.index()).await?;
        Ok(Page::new(items, total, page))
    }
}
