use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, deleted},
    services::tenancy::{CreateRole, RoleView, UpdateRole},
    ApiResponse, ApiResult, AppState,
};

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<RoleView>> {
    let roles = state.services.tenancy.list_roles(user.tenant_id).await?;
    Ok(Json(ApiResponse::success(roles)))
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateRole>,
) -> Result<impl IntoResponse, ServiceError> {
    let role = state.services.tenancy.create_role(&user, payload).await?;
    Ok(created(role))
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRole>,
) -> ApiResult<RoleView> {
    let role = state.services.tenancy.update_role(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    state.services.tenancy.delete_role(&user, id).await?;
    Ok(deleted(id))
}
