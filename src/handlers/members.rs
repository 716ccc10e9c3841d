use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::created,
    services::tenancy::{AddMember, MemberView, RoleRef},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct OwnershipRequest {
    pub user_id: Uuid,
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<MemberView>> {
    let members = state.services.tenancy.list_members(user.tenant_id).await?;
    Ok(Json(ApiResponse::success(members)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AddMember>,
) -> Result<impl IntoResponse, ServiceError> {
    let member = state.services.tenancy.add_member(&user, payload).await?;
    Ok(created(member))
}

pub async fn change_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RoleRef>,
) -> ApiResult<MemberView> {
    let member = state
        .services
        .tenancy
        .change_member_role(&user, user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Value> {
    state.services.tenancy.remove_member(&user, user_id).await?;
    Ok(crate::handlers::common::deleted(user_id))
}

/// Hands the OWNER role to another member; the caller becomes ADMIN.
pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<OwnershipRequest>,
) -> ApiResult<Value> {
    state
        .services
        .tenancy
        .transfer_ownership(&user, payload.user_id)
        .await?;
    Ok(Json(ApiResponse::success(json!({
        "owner_user_id": payload.user_id,
        "previous_owner_user_id": user.user_id,
    }))))
}
