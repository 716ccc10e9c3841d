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
    entities::branch,
    errors::ServiceError,
    handlers::common::{created, deleted},
    services::branches::{BranchMemberView, CreateBranch, UpdateBranch},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct BranchMemberRequest {
    pub user_id: Uuid,
}

pub async fn list_branches(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<branch::Model>> {
    let branches = state.services.branches.list(user.tenant_id).await?;
    Ok(Json(ApiResponse::success(branches)))
}

pub async fn get_branch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<branch::Model> {
    let branch = state.services.branches.get(user.tenant_id, id).await?;
    Ok(Json(ApiResponse::success(branch)))
}

pub async fn create_branch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateBranch>,
) -> Result<impl IntoResponse, ServiceError> {
    let branch = state.services.branches.create(&user, payload).await?;
    Ok(created(branch))
}

pub async fn update_branch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBranch>,
) -> ApiResult<branch::Model> {
    let branch = state.services.branches.update(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(branch)))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    state.services.branches.delete(&user, id).await?;
    Ok(deleted(id))
}

pub async fn list_branch_members(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<BranchMemberView>> {
    let members = state.services.branches.list_members(user.tenant_id, id).await?;
    Ok(Json(ApiResponse::success(members)))
}

pub async fn add_branch_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BranchMemberRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let membership = state
        .services
        .branches
        .add_member(&user, id, payload.user_id)
        .await?;
    Ok(created(membership))
}

pub async fn remove_branch_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Value> {
    state
        .services
        .branches
        .remove_member(&user, id, user_id)
        .await?;
    Ok(Json(ApiResponse::success(json!({
        "branch_id": id,
        "user_id": user_id,
        "removed": true,
    }))))
}
