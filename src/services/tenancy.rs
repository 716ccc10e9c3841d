use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::auth::permissions::is_valid_grant;
use crate::auth::{AuthService, AuthUser, SystemRole, TokenResponse};
use crate::entities::{
    branch_membership, role, role_permission, tenant, tenant_membership, user,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{self, AuditEntry};

const INVALID_CREDENTIALS: &str = "Invalid email, password or tenant";

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterTenant {
    #[validate(length(min = 1, max = 200))]
    pub tenant_name: String,
    #[validate(custom = "crate::services::validate_slug")]
    pub tenant_slug: String,
    #[validate(email)]
    pub owner_email: String,
    #[validate(length(min = 8))]
    pub owner_password: String,
    #[validate(length(min = 1, max = 200))]
    pub owner_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Login {
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(length(min = 1))]
    pub tenant_slug: String,
}

/// Role reference by id or key; exactly one must be given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleRef {
    pub role_id: Option<Uuid>,
    pub role_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddMember {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    /// Needed only when the email is not yet a user.
    pub password: Option<String>,
    #[serde(flatten)]
    pub role: RoleRef,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRole {
    #[validate(length(min = 1, max = 50))]
    pub key: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateRole {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
}

/// Token plus the identity it was issued for.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub tenant: tenant::Model,
    pub user: user::Model,
    pub role_key: String,
    #[serde(flatten)]
    pub token: TokenResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct Me {
    pub user: user::Model,
    pub tenant: tenant::Model,
    pub role_id: Uuid,
    pub role_key: String,
    pub permissions: Vec<String>,
    pub branch_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role_id: Uuid,
    pub role_key: String,
    pub joined_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleView {
    #[serde(flatten)]
    pub role: role::Model,
    pub permissions: Vec<String>,
}

/// Tenants, memberships and roles.
#[derive(Clone)]
pub struct TenancyService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    auth: Arc<AuthService>,
}

impl TenancyService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, auth: Arc<AuthService>) -> Self {
        Self {
            db,
            event_sender,
            auth,
        }
    }

    /// Creates a tenant with its system roles and its owner, and signs the
    /// owner in.
    #[instrument(skip(self, input), fields(tenant_slug = %input.tenant_slug))]
    pub async fn register_tenant(&self, input: RegisterTenant) -> Result<Session, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.owner_email);

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin registration transaction");
            ServiceError::DatabaseError(e)
        })?;

        let slug_taken = tenant::Entity::find()
            .filter(tenant::Column::Slug.eq(input.tenant_slug.as_str()))
            .count(&txn)
            .await?
            > 0;
        if slug_taken {
            return Err(ServiceError::Conflict(format!(
                "Tenant slug '{}' is already taken",
                input.tenant_slug
            )));
        }

        let now = Utc::now();
        let tenant = tenant::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.tenant_name.trim().to_string()),
            slug: Set(input.tenant_slug.clone()),
            next_transfer_seq: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, "Tenant slug is already taken"))?;

        let roles = seed_system_roles(&txn, tenant.id).await?;
        let owner_role = roles
            .get(&SystemRole::Owner)
            .ok_or_else(|| ServiceError::InternalError("owner role was not seeded".into()))?;

        let owner = match user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&txn)
            .await?
        {
            Some(existing) => {
                if !existing.is_active || !verify_password(&input.owner_password, &existing.password_hash) {
                    return Err(ServiceError::Unauthorized(
                        "Existing account password did not match".into(),
                    ));
                }
                existing
            }
            None => {
                create_user(&txn, &email, input.owner_name.trim(), &input.owner_password).await?
            }
        };

        insert_membership(&txn, tenant.id, owner.id, owner_role.id).await?;

        audit::record(
            &txn,
            AuditEntry::new(tenant.id, owner.id, "tenant", tenant.id, "tenant.register").after(&tenant),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit tenant registration");
            ServiceError::DatabaseError(e)
        })?;

        counter!("stockroom_tenants.registered", 1);
        info!(tenant_id = %tenant.id, owner_id = %owner.id, "tenant registered");
        self.event_sender
            .publish(Event::TenantRegistered {
                tenant_id: tenant.id,
                owner_user_id: owner.id,
            });

        let token = self.auth.issue_token(owner.id, tenant.id)?;
        Ok(Session {
            tenant,
            user: owner,
            role_key: SystemRole::Owner.key().to_string(),
            token,
        })
    }

    /// Password login into one tenant. Every failure gives the same 401.
    #[instrument(skip(self, input), fields(tenant_slug = %input.tenant_slug))]
    pub async fn login(&self, input: Login) -> Result<Session, ServiceError> {
        input.validate()?;
        let db = self.db.as_ref();
        let denied = || ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string());

        let user = user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(&input.email)))
            .one(db)
            .await?;
        let Some(user) = user.filter(|u| u.is_active && verify_password(&input.password, &u.password_hash))
        else {
            counter!("stockroom_auth.login_failed", 1);
            warn!("login rejected");
            return Err(denied());
        };

        let Some(tenant) = tenant::Entity::find()
            .filter(tenant::Column::Slug.eq(input.tenant_slug.as_str()))
            .one(db)
            .await?
        else {
            counter!("stockroom_auth.login_failed", 1);
            return Err(denied());
        };

        let Some(principal) = crate::auth::load_principal(db, user.id, tenant.id).await? else {
            counter!("stockroom_auth.login_failed", 1);
            warn!(user_id = %user.id, "login without membership");
            return Err(denied());
        };

        let token = self.auth.issue_token(user.id, tenant.id)?;
        info!(user_id = %user.id, tenant_id = %tenant.id, "user logged in");
        Ok(Session {
            tenant,
            user,
            role_key: principal.role_key,
            token,
        })
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn me(&self, principal: &AuthUser) -> Result<Me, ServiceError> {
        let db = self.db.as_ref();
        let user = user::Entity::find_by_id(principal.user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", principal.user_id))?;
        let tenant = tenant::Entity::find_by_id(principal.tenant_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Tenant", principal.tenant_id))?;

        Ok(Me {
            user,
            tenant,
            role_id: principal.role_id,
            role_key: principal.role_key.clone(),
            permissions: principal.permissions.clone(),
            branch_ids: principal.branch_ids.clone(),
        })
    }

    // Members

    #[instrument(skip(self))]
    pub async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<MemberView>, ServiceError> {
        let db = self.db.as_ref();
        let memberships = tenant_membership::Entity::find()
            .filter(tenant_membership::Column::TenantId.eq(tenant_id))
            .order_by_asc(tenant_membership::Column::CreatedAt)
            .find_also_related(user::Entity)
            .all(db)
            .await?;

        let roles: HashMap<Uuid, role::Model> = role::Entity::find()
            .filter(role::Column::TenantId.eq(tenant_id))
            .all(db)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        Ok(memberships
            .into_iter()
            .filter_map(|(membership, user)| {
                let user = user?;
                Some(MemberView {
                    user_id: user.id,
                    email: user.email,
                    name: user.name,
                    role_id: membership.role_id,
                    role_key: roles
                        .get(&membership.role_id)
                        .map(|r| r.key.clone())
                        .unwrap_or_default(),
                    joined_at: membership.created_at,
                })
            })
            .collect())
    }

    /// Adds a user to the tenant, creating the account when the email is
    /// unknown.
    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn add_member(&self, actor: &AuthUser, input: AddMember) -> Result<MemberView, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.email);

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin add-member transaction");
            ServiceError::DatabaseError(e)
        })?;

        let role = resolve_role(&txn, actor.tenant_id, &input.role).await?;
        if role.key == SystemRole::Owner.key() {
            return Err(ServiceError::Conflict(
                "OWNER can only be assigned through an ownership transfer".into(),
            ));
        }

        let user = match user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&txn)
            .await?
        {
            Some(existing) => existing,
            None => {
                let password = input.password.as_deref().ok_or_else(|| {
                    ServiceError::ValidationError("password is required for a new user".into())
                })?;
                let name = input.name.as_deref().map(str::trim).unwrap_or(email.as_str());
                create_user(&txn, &email, name, password).await?
            }
        };

        let already_member = tenant_membership::Entity::find()
            .filter(tenant_membership::Column::TenantId.eq(actor.tenant_id))
            .filter(tenant_membership::Column::UserId.eq(user.id))
            .count(&txn)
            .await?
            > 0;
        if already_member {
            return Err(ServiceError::Conflict(format!("{} is already a member", email)));
        }

        let membership = insert_membership(&txn, actor.tenant_id, user.id, role.id).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "tenant_membership", membership.id, "member.add")
                .after(&json!({ "user_id": user.id, "role_key": role.key })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit add-member");
            ServiceError::DatabaseError(e)
        })?;

        info!(user_id = %user.id, role = %role.key, "member added");
        self.event_sender
            .publish(Event::MemberAdded {
                tenant_id: actor.tenant_id,
                user_id: user.id,
                role_key: role.key.clone(),
            });

        Ok(MemberView {
            user_id: user.id,
            email: user.email,
            name: user.name,
            role_id: role.id,
            role_key: role.key,
            joined_at: membership.created_at,
        })
    }

    #[instrument(skip(self, actor, role_ref), fields(actor_id = %actor.user_id))]
    pub async fn change_member_role(
        &self,
        actor: &AuthUser,
        user_id: Uuid,
        role_ref: RoleRef,
    ) -> Result<MemberView, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin change-role transaction");
            ServiceError::DatabaseError(e)
        })?;

        let membership = find_membership(&txn, actor.tenant_id, user_id).await?;
        let current = role::Entity::find_by_id(membership.role_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Role", membership.role_id))?;
        if current.key == SystemRole::Owner.key() {
            return Err(ServiceError::Conflict(
                "The owner's role changes only through an ownership transfer".into(),
            ));
        }

        let role = resolve_role(&txn, actor.tenant_id, &role_ref).await?;
        if role.key == SystemRole::Owner.key() {
            return Err(ServiceError::Conflict(
                "OWNER can only be assigned through an ownership transfer".into(),
            ));
        }

        let mut active: tenant_membership::ActiveModel = membership.clone().into();
        active.role_id = Set(role.id);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "tenant_membership", membership.id, "member.change_role")
                .before(&json!({ "role_key": current.key }))
                .after(&json!({ "role_key": role.key })),
        )
        .await?;

        let user = user::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit change-role");
            ServiceError::DatabaseError(e)
        })?;

        info!(user_id = %user_id, from = %current.key, to = %role.key, "member role changed");
        Ok(MemberView {
            user_id,
            email: user.email,
            name: user.name,
            role_id: role.id,
            role_key: role.key,
            joined_at: updated.created_at,
        })
    }

    /// Removes a member and their branch memberships in this tenant.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn remove_member(&self, actor: &AuthUser, user_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin remove-member transaction");
            ServiceError::DatabaseError(e)
        })?;

        let membership = find_membership(&txn, actor.tenant_id, user_id).await?;
        let role = role::Entity::find_by_id(membership.role_id).one(&txn).await?;
        if role.as_ref().map(|r| r.key.as_str()) == Some(SystemRole::Owner.key()) {
            return Err(ServiceError::Conflict("The owner cannot be removed".into()));
        }

        branch_membership::Entity::delete_many()
            .filter(branch_membership::Column::TenantId.eq(actor.tenant_id))
            .filter(branch_membership::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        tenant_membership::Entity::delete_by_id(membership.id)
            .exec(&txn)
            .await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "tenant_membership", membership.id, "member.remove")
                .before(&json!({
                    "user_id": user_id,
                    "role_key": role.map(|r| r.key),
                })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit remove-member");
            ServiceError::DatabaseError(e)
        })?;

        info!(user_id = %user_id, "member removed");
        self.event_sender
            .publish(Event::MemberRemoved {
                tenant_id: actor.tenant_id,
                user_id,
            });
        Ok(())
    }

    /// Hands OWNER to another member; the caller becomes ADMIN.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn transfer_ownership(&self, actor: &AuthUser, target_user_id: Uuid) -> Result<(), ServiceError> {
        if !actor.is_owner() {
            return Err(ServiceError::Forbidden(
                "Only the owner can transfer ownership".into(),
            ));
        }
        if target_user_id == actor.user_id {
            return Err(ServiceError::ValidationError(
                "Ownership is already held by this user".into(),
            ));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin ownership transaction");
            ServiceError::DatabaseError(e)
        })?;

        let owner_role = system_role(&txn, actor.tenant_id, SystemRole::Owner).await?;
        let admin_role = system_role(&txn, actor.tenant_id, SystemRole::Admin).await?;

        let current = find_membership(&txn, actor.tenant_id, actor.user_id).await?;
        if current.role_id != owner_role.id {
            return Err(ServiceError::Forbidden(
                "Only the owner can transfer ownership".into(),
            ));
        }
        let target = find_membership(&txn, actor.tenant_id, target_user_id).await?;

        let now = Utc::now();
        let mut demote: tenant_membership::ActiveModel = current.into();
        demote.role_id = Set(admin_role.id);
        demote.updated_at = Set(now);
        demote.update(&txn).await?;

        let mut promote: tenant_membership::ActiveModel = target.clone().into();
        promote.role_id = Set(owner_role.id);
        promote.updated_at = Set(now);
        promote.update(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "tenant", actor.tenant_id, "tenant.transfer_ownership")
                .before(&json!({ "owner_user_id": actor.user_id }))
                .after(&json!({ "owner_user_id": target_user_id })),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit ownership transfer");
            ServiceError::DatabaseError(e)
        })?;

        info!(from = %actor.user_id, to = %target_user_id, "ownership transferred");
        self.event_sender
            .publish(Event::OwnershipTransferred {
                tenant_id: actor.tenant_id,
                from_user_id: actor.user_id,
                to_user_id: target_user_id,
            });
        Ok(())
    }

    // Roles

    #[instrument(skip(self))]
    pub async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<RoleView>, ServiceError> {
        let db = self.db.as_ref();
        let roles = role::Entity::find()
            .filter(role::Column::TenantId.eq(tenant_id))
            .order_by_desc(role::Column::IsSystem)
            .order_by_asc(role::Column::Key)
            .find_with_related(role_permission::Entity)
            .all(db)
            .await?;

        Ok(roles
            .into_iter()
            .map(|(role, perms)| RoleView {
                role,
                permissions: perms.into_iter().map(|p| p.permission_key).collect(),
            })
            .collect())
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn create_role(&self, actor: &AuthUser, input: CreateRole) -> Result<RoleView, ServiceError> {
        input.validate()?;
        let key = input.key.trim().to_uppercase();
        if SystemRole::from_key(&key).is_some() {
            return Err(ServiceError::Conflict(format!("{} is a system role", key)));
        }
        let permissions = validated_grants(&input.permissions)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin create-role transaction");
            ServiceError::DatabaseError(e)
        })?;

        let now = Utc::now();
        let role = role::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            key: Set(key.clone()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description.clone()),
            is_system: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, format!("Role {} already exists", key)))?;

        replace_permissions(&txn, role.id, &permissions).await?;

        let view = RoleView {
            role,
            permissions,
        };
        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "role", view.role.id, "role.create").after(&view),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit create-role");
            ServiceError::DatabaseError(e)
        })?;

        info!(role_id = %view.role.id, key = %view.role.key, "role created");
        Ok(view)
    }

    #[instrument(skip(self, actor, input), fields(actor_id = %actor.user_id))]
    pub async fn update_role(
        &self,
        actor: &AuthUser,
        role_id: Uuid,
        input: UpdateRole,
    ) -> Result<RoleView, ServiceError> {
        input.validate()?;
        let permissions = input.permissions.as_deref().map(validated_grants).transpose()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin update-role transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = custom_role(&txn, actor.tenant_id, role_id).await?;
        let before = load_role_view(&txn, existing.clone()).await?;

        let mut active: role::ActiveModel = existing.into();
        if let Some(name) = &input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = &input.description {
            active.description = Set(Some(description.clone()));
        }
        active.updated_at = Set(Utc::now());
        let role = active.update(&txn).await?;

        if let Some(permissions) = &permissions {
            replace_permissions(&txn, role.id, permissions).await?;
        }
        let after = load_role_view(&txn, role).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "role", role_id, "role.update")
                .before(&before)
                .after(&after),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit update-role");
            ServiceError::DatabaseError(e)
        })?;

        info!(role_id = %role_id, "role updated");
        Ok(after)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete_role(&self, actor: &AuthUser, role_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to begin delete-role transaction");
            ServiceError::DatabaseError(e)
        })?;

        let existing = custom_role(&txn, actor.tenant_id, role_id).await?;
        let assigned = tenant_membership::Entity::find()
            .filter(tenant_membership::Column::RoleId.eq(role_id))
            .count(&txn)
            .await?;
        if assigned > 0 {
            return Err(ServiceError::Conflict(format!(
                "Role {} is assigned to {} member(s)",
                existing.key, assigned
            )));
        }

        let before = load_role_view(&txn, existing).await?;
        role_permission::Entity::delete_many()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        role::Entity::delete_by_id(role_id).exec(&txn).await?;

        audit::record(
            &txn,
            AuditEntry::new(actor.tenant_id, actor.user_id, "role", role_id, "role.delete").before(&before),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "failed to commit delete-role");
            ServiceError::DatabaseError(e)
        })?;

        info!(role_id = %role_id, "role deleted");
        Ok(())
    }
}

/// Seeds OWNER, ADMIN, EDITOR and VIEWER for a new tenant.
pub(crate) async fn seed_system_roles<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
) -> Result<HashMap<SystemRole, role::Model>, ServiceError> {
    let now = Utc::now();
    let mut seeded = HashMap::new();

    for system in SystemRole::all() {
        let def = system.definition();
        let role = role::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            key: Set(system.key().to_string()),
            name: Set(def.name.to_string()),
            description: Set(Some(def.description.to_string())),
            is_system: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        let perms: Vec<String> = def.permissions.iter().map(|p| p.to_string()).collect();
        replace_permissions(conn, role.id, &perms).await?;
        seeded.insert(system, role);
    }

    Ok(seeded)
}

async fn create_user<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    name: &str,
    password: &str,
) -> Result<user::Model, ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::ValidationError(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let now = Utc::now();
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        name: Set(name.to_string()),
        password_hash: Set(hash_password(password)?),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| ServiceError::from_unique_violation(e, "Email is already registered"))
}

async fn insert_membership<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
) -> Result<tenant_membership::Model, ServiceError> {
    let now = Utc::now();
    tenant_membership::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        user_id: Set(user_id),
        role_id: Set(role_id),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| ServiceError::from_unique_violation(e, "User is already a member"))
}

async fn find_membership<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<tenant_membership::Model, ServiceError> {
    tenant_membership::Entity::find()
        .filter(tenant_membership::Column::TenantId.eq(tenant_id))
        .filter(tenant_membership::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Member", user_id))
}

async fn system_role<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    system: SystemRole,
) -> Result<role::Model, ServiceError> {
    role::Entity::find()
        .filter(role::Column::TenantId.eq(tenant_id))
        .filter(role::Column::Key.eq(system.key()))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("system role {} missing", system)))
}

async fn resolve_role<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    role_ref: &RoleRef,
) -> Result<role::Model, ServiceError> {
    let query = role::Entity::find().filter(role::Column::TenantId.eq(tenant_id));
    let found = match (role_ref.role_id, role_ref.role_key.as_deref()) {
        (Some(id), None) => query.filter(role::Column::Id.eq(id)).one(conn).await?,
        (None, Some(key)) => {
            query
                .filter(role::Column::Key.eq(key.trim().to_uppercase()))
                .one(conn)
                .await?
        }
        _ => {
            return Err(ServiceError::ValidationError(
                "exactly one of role_id or role_key is required".into(),
            ))
        }
    };
    found.ok_or_else(|| ServiceError::NotFound("Role not found".into()))
}

/// Loads a tenant role that may be edited.
async fn custom_role<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    role_id: Uuid,
) -> Result<role::Model, ServiceError> {
    let role = role::Entity::find_by_id(role_id)
        .filter(role::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Role", role_id))?;
    if role.is_system {
        return Err(ServiceError::Conflict(format!(
            "System role {} cannot be modified",
            role.key
        )));
    }
    Ok(role)
}

async fn load_role_view<C: ConnectionTrait>(conn: &C, role: role::Model) -> Result<RoleView, ServiceError> {
    let permissions = role_permission::Entity::find()
        .filter(role_permission::Column::RoleId.eq(role.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| p.permission_key)
        .collect();
    Ok(RoleView { role, permissions })
}

async fn replace_permissions<C: ConnectionTrait>(
    conn: &C,
    role_id: Uuid,
    permissions: &[String],
) -> Result<(), ServiceError> {
    role_permission::Entity::delete_many()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .exec(conn)
        .await?;

    if permissions.is_empty() {
        return Ok(());
    }
    role_permission::Entity::insert_many(permissions.iter().map(|key| role_permission::ActiveModel {
        id: Set(Uuid::new_v4()),
        role_id: Set(role_id),
        permission_key: Set(key.clone()),
    }))
    .exec(conn)
    .await?;
    Ok(())
}

/// Dedupes and checks grants against the catalogue.
fn validated_grants(requested: &[String]) -> Result<Vec<String>, ServiceError> {
    let mut grants: Vec<String> = Vec::with_capacity(requested.len());
    for key in requested.iter().map(|k| k.trim()) {
        if !is_valid_grant(key) {
            return Err(ServiceError::ValidationError(format!(
                "Unknown permission '{}'",
                key
            )));
        }
        if !grants.iter().any(|g| g == key) {
            grants.push(key.to_string());
        }
    }
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Jo@Example.COM "), "jo@example.com");
    }

    #[test]
    fn grants_are_deduped_and_checked() {
        let grants = validated_grants(&[
            "stock:read".to_string(),
            " stock:read".to_string(),
            "transfers:*".to_string(),
        ])
        .unwrap();
        assert_eq!(grants, vec!["stock:read", "transfers:*"]);

        assert!(matches!(
            validated_grants(&["warehouse:read".to_string()]),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
