/*!
 * # Authentication and Authorization Module
 *
 * Bearer JWTs (HS256) identify a user inside one tenant. The token only
 * carries identity: the membership, role permissions and branch memberships
 * are reloaded from the database on every request, so removals and role
 * changes apply immediately.
 */

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{branch_membership, role, role_permission, tenant_membership, user};
use crate::errors::ServiceError;

pub mod password;
pub mod permissions;
pub mod rbac;

pub use permissions::consts;
pub use rbac::{has_permission, SystemRole};

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,       // Subject (user ID)
    pub tenant_id: String, // Tenant the token is scoped to
    pub jti: String,       // JWT ID (unique identifier for this token)
    pub iat: i64,          // Issued at time
    pub exp: i64,          // Expiration time
    pub nbf: i64,          // Not valid before time
    pub iss: String,       // Issuer
}

/// Authenticated principal, resolved from the token and the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role_id: Uuid,
    pub role_key: String,
    pub permissions: Vec<String>,
    pub branch_ids: Vec<Uuid>,
    #[serde(skip_serializing)]
    pub token_id: String,
}

impl AuthUser {
    /// Check if the user has a specific permission, honouring wildcards
    pub fn has_permission(&self, permission: &str) -> bool {
        has_permission(&self.permissions, permission)
    }

    pub fn is_owner(&self) -> bool {
        self.role_key == SystemRole::Owner.key()
    }

    pub fn is_branch_member(&self, branch_id: Uuid) -> bool {
        self.branch_ids.contains(&branch_id)
    }

    /// Branch-scoped actions need membership or `branches:manage`.
    pub fn can_act_on_branch(&self, branch_id: Uuid) -> bool {
        self.is_branch_member(branch_id) || self.has_permission(consts::BRANCHES_MANAGE)
    }

    pub fn require(&self, permission: &str) -> Result<(), ServiceError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "Missing permission {}",
                permission
            )))
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, jwt_issuer: String, access_token_expiration: Duration) -> Self {
        Self {
            jwt_secret,
            jwt_issuer,
            access_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.jwt_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration_secs),
        )
    }
}

/// Access token returned by login and registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Signs an access token for a user inside a tenant.
    pub fn issue_token(&self, user_id: Uuid, tenant_id: Uuid) -> Result<TokenResponse, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
        })
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.validate_nbf = true;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Resolves claims into a principal using the current database state.
    pub async fn authenticate(&self, claims: &Claims) -> Result<AuthUser, AuthError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let tenant_id = Uuid::parse_str(&claims.tenant_id).map_err(|_| AuthError::InvalidToken)?;

        let mut principal = load_principal(self.db.as_ref(), user_id, tenant_id)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?
            .ok_or(AuthError::MembershipRevoked)?;
        principal.token_id = claims.jti.clone();
        Ok(principal)
    }
}

/// Loads an active user's membership, role permissions and branch ids.
/// Returns `None` when the user is inactive or not a member of the tenant.
pub async fn load_principal<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<AuthUser>, sea_orm::DbErr> {
    let active = user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map(|u| u.is_active)
        .unwrap_or(false);
    if !active {
        return Ok(None);
    }

    let Some(membership) = tenant_membership::Entity::find()
        .filter(tenant_membership::Column::TenantId.eq(tenant_id))
        .filter(tenant_membership::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    let Some(role) = role::Entity::find_by_id(membership.role_id).one(conn).await? else {
        return Ok(None);
    };

    let permissions = role_permission::Entity::find()
        .filter(role_permission::Column::RoleId.eq(role.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| p.permission_key)
        .collect();

    let branch_ids = branch_membership::Entity::find()
        .filter(branch_membership::Column::TenantId.eq(tenant_id))
        .filter(branch_membership::Column::UserId.eq(user_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|m| m.branch_id)
        .collect();

    Ok(Some(AuthUser {
        user_id,
        tenant_id,
        role_id: role.id,
        role_key: role.key,
        permissions,
        branch_ids,
        token_id: String::new(),
    }))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Membership is no longer active")]
    MembershipRevoked,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientPermissions => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(msg) => ServiceError::JwtError(msg),
            AuthError::DatabaseError(msg) | AuthError::InternalError(msg) => {
                ServiceError::InternalError(msg)
            }
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Permission middleware to check if a user has the required permission
pub async fn permission_middleware(
    State(required_permission): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_permission(&required_permission) {
        debug!(
            user_id = %user.user_id,
            permission = %required_permission,
            "permission denied"
        );
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that extracts and validates auth tokens
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return AuthError::InternalError("Authentication service not available".into())
                .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "authentication failed");
            e.into_response()
        }
    }
}

/// Extract authentication info from request headers
async fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingAuth)?;

    let claims = auth_service.validate_token(token)?;
    auth_service.authenticate(&claims).await
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_permission(self, permission: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_permission(self, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn service(secret: &str, issuer: &str) -> AuthService {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        AuthService::new(
            AuthConfig::new(secret.into(), issuer.into(), Duration::from_secs(600)),
            Arc::new(db),
        )
    }

    #[test]
    fn issued_tokens_validate() {
        let svc = service("kq7PzR2vXw9LmN4tB8yC1dF6gH3jS5aE0uVbQrT", "stockroom-api");
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let token = svc.issue_token(user_id, tenant_id).unwrap();
        assert_eq!(token.token_type, "Bearer");

        let claims = svc.validate_token(&token.access_token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.tenant_id, tenant_id.to_string());
        assert_eq!(claims.iss, "stockroom-api");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tokens_from_other_secret_or_issuer_are_rejected() {
        let issuer = service("kq7PzR2vXw9LmN4tB8yC1dF6gH3jS5aE0uVbQrT", "stockroom-api");
        let token = issuer
            .issue_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap()
            .access_token;

        let other_secret = service("Zx8Wc7Vb6Nm5Lk4Jh3Gf2Ds1Aq0PoIuYtReWqSd", "stockroom-api");
        assert_matches!(other_secret.validate_token(&token), Err(AuthError::InvalidToken));

        let other_issuer = service("kq7PzR2vXw9LmN4tB8yC1dF6gH3jS5aE0uVbQrT", "someone-else");
        assert_matches!(other_issuer.validate_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        use axum::http::StatusCode;
        assert_eq!(
            ServiceError::from(AuthError::InvalidToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::from(AuthError::InsufficientPermissions).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn branch_access_requires_membership_or_manage() {
        let branch = Uuid::new_v4();
        let mut user = AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            role_key: "EDITOR".into(),
            permissions: vec!["stock:*".into()],
            branch_ids: vec![],
            token_id: String::new(),
        };
        assert!(!user.can_act_on_branch(branch));

        user.branch_ids.push(branch);
        assert!(user.can_act_on_branch(branch));

        user.branch_ids.clear();
        user.permissions.push(consts::BRANCHES_MANAGE.into());
        assert!(user.can_act_on_branch(branch));
    }
}
