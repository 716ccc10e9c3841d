use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::{
    branch, branch_membership, product_stock, stock_ledger, stock_lot, stock_transfer,
    tenant_membership, user,
};
use crate::errors::ServiceError;
use crate::services::audit::{self, AuditEntry};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBranch {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(custom = "crate::services::validate_slug")]
    pub slug: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBranch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(custom = "crate::services::validate_slug")]
    pub slug: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchMemberView {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub added_at: chrono::DateTime<Utc>,
}

/// Branch catalogue and branch memberships.
#[derive(Clone)]
pub struct BranchService {
    db: Arc<DatabaseConnection>,
}

impl BranchService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<branch::Model>, ServiceError> {
        Ok(branch::Entity::find()
            .filter(branch::Column::TenantId.eq(tenant_id))
            .order_by_asc(branch::Column::Name)
            .all(self.db.as_ref())
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, tenant_id: Uuid, branch_id: Uuid) -> Result<branch::Model, ServiceError> {
        find_branch(self.db.as_ref(), tenant_id, branch_id).await
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn create(&self, actor: &AuthUser, input: CreateBranch) -> Result<branch::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin create-branch transaction");
            ServiceError::DatabaseError(e)
        })?;

        ensure_slug_free(&txn, actor.tenant_id, &input.slug, None).await?;

        let now = Utc::now();
        let branch = branch::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            name: Set(input.name.trim().to_string()),
            slug: Set(input.slug.clone()),
            address: Set(input.address.clone()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, "Branch slug already exists"))?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "branch", branch.id, "branch.create").after(&branch),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit create-branch");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %branch.id, slug = %branch.slug, "branch created");
        Ok(branch)
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn update(
        &self,
        actor: &AuthUser,
        branch_id: Uuid,
        input: UpdateBranch,
    ) -> Result<branch::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin update-branch transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = find_branch(&txn, actor.tenant_id, branch_id).await?;
        if let Some(slug) = &input.slug {
            ensure_slug_free(&txn, actor.tenant_id, slug, Some(branch_id)).await?;
        }

        let mut active: branch::ActiveModel = existing.clone().into();
        if let Some(name) = &input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(slug) = &input.slug {
            active.slug = Set(slug.clone());
        }
        if let Some(address) = &input.address {
            active.address = Set(Some(address.clone()));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| ServiceError::from_unique_violation(e, "Branch slug already exists"))?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "branch", branch_id, "branch.update")
                .before(&existing)
                .after(&updated),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit update-branch");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %branch_id, is_active = updated.is_active, "branch updated");
        Ok(updated)
    }

    /// Deletes a branch that has never held stock nor taken part in a
    /// transfer.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete(&self, actor: &AuthUser, branch_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin delete-branch transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = find_branch(&txn, actor.tenant_id, branch_id).await?;

        let stock_rows = product_stock::Entity::find()
            .filter(product_stock::Column::BranchId.eq(branch_id))
            .filter(product_stock::Column::QtyOnHand.ne(0))
            .count(&txn)
            .await?;
        let lots = stock_lot::Entity::find()
            .filter(stock_lot::Column::BranchId.eq(branch_id))
            .count(&txn)
            .await?;
        let ledger = stock_ledger::Entity::find()
            .filter(stock_ledger::Column::BranchId.eq(branch_id))
            .count(&txn)
            .await?;
        let transfers = stock_transfer::Entity::find()
            .filter(
                Condition::any()
                    .add(stock_transfer::Column::SourceBranchId.eq(branch_id))
                    .add(stock_transfer::Column::DestinationBranchId.eq(branch_id)),
            )
            .count(&txn)
            .await?;
        if stock_rows + lots + ledger > 0 {
            return Err(ServiceError::Conflict(format!(
                "Branch {} has stock history; deactivate it instead",
                existing.slug
            )));
        }
        if transfers > 0 {
            return Err(ServiceError::Conflict(format!(
                "Branch {} is referenced by {} transfer(s); deactivate it instead",
                existing.slug, transfers
            )));
        }

        product_stock::Entity::delete_many()
            .filter(product_stock::Column::BranchId.eq(branch_id))
            .exec(&txn)
            .await?;
        branch_membership::Entity::delete_many()
            .filter(branch_membership::Column::BranchId.eq(branch_id))
            .exec(&txn)
            .await?;
        branch::Entity::delete_by_id(branch_id).exec(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "branch", branch_id, "branch.delete").before(&existing),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit delete-branch");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %branch_id, "branch deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_members(
        &self,
        tenant_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Vec<BranchMemberView>, ServiceError> {
        let db = self.db.as_ref();
        find_branch(db, tenant_id, branch_id).await?;

        Ok(branch_membership::Entity::find()
            .filter(branch_membership::Column::TenantId.eq(tenant_id))
            .filter(branch_membership::Column::BranchId.eq(branch_id))
            .order_by_asc(branch_membership::Column::CreatedAt)
            .find_also_related(user::Entity)
            .all(db)
            .await?
            .into_iter()
            .filter_map(|(membership, user)| {
                user.map(|u| BranchMemberView {
                    user_id: u.id,
                    email: u.email,
                    name: u.name,
                    added_at: membership.created_at,
                })
            })
            .collect())
    }

    /// Adds a tenant member to a branch. Adding an existing member is a
    /// no-op.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn add_member(
        &self,
        actor: &AuthUser,
        branch_id: Uuid,
        user_id: Uuid,
    ) -> Result<branch_membership::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin add-branch-member transaction");
            ServiceError::DatabaseError(e)
        })?;

        find_branch(&txn, actor.tenant_id, branch_id).await?;
        let is_tenant_member = tenant_membership::Entity::find()
            .filter(tenant_membership::Column::TenantId.eq(actor.tenant_id))
            .filter(tenant_membership::Column::UserId.eq(user_id))
            .count(&txn)
            .await?
            > 0;
        if !is_tenant_member {
            return Err(ServiceError::not_found("Member", user_id));
        }

        if let Some(existing) = branch_membership::Entity::find()
            .filter(branch_membership::Column::BranchId.eq(branch_id))
            .filter(branch_membership::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        {
            return Ok(existing);
        }

        let membership = branch_membership::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            branch_id: Set(branch_id),
            user_id: Set(user_id),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, "User is already a branch member"))?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "branch", branch_id, "branch.add_member")
                .after(&json!({ "user_id": user_id })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit add-branch-member");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %branch_id, user_id = %user_id, "branch member added");
        Ok(membership)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn remove_member(
        &self,
        actor: &AuthUser,
        branch_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin remove-branch-member transaction");
            ServiceError::DatabaseError(e)
        })?;

        find_branch(&txn, actor.tenant_id, branch_id).await?;
        let result = branch_membership::Entity::delete_many()
            .filter(branch_membership::Column::TenantId.eq(actor.tenant_id))
            .filter(branch_membership::Column::BranchId.eq(branch_id))
            .filter(branch_membership::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Branch member", user_id));
        }

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "branch", branch_id, "branch.remove_member")
                .before(&json!({ "user_id": user_id })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit remove-branch-member");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %branch_id, user_id = %user_id, "branch member removed");
        Ok(())
    }
}

pub(crate) async fn find_branch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    branch_id: Uuid,
) -> Result<branch::Model, ServiceError> {
    branch::Entity::find_by_id(branch_id)
        .filter(branch::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Branch", branch_id))
}

async fn ensure_slug_free<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    slug: &str,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut query = branch::Entity::find()
        .filter(branch::Column::TenantId.eq(tenant_id))
        .filter(branch::Column::Slug.eq(slug));
    if let Some(id) = except {
        query = query.filter(branch::Column::Id.ne(id));
    }
    if query.count(conn).await? > 0 {
        return Err(ServiceError::Conflict(format!(
            "Branch slug '{}' already exists",
            slug
        )));
    }
    Ok(())
}
