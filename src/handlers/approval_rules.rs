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
    services::approvals::{RuleDetail, RuleInput},
    ApiResponse, ApiResult, AppState,
};

pub async fn list_rules(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<RuleDetail>> {
    let rules = state.services.approvals.list_rules(user.tenant_id).await?;
    Ok(Json(ApiResponse::success(rules)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<RuleDetail> {
    let rule = state.services.approvals.get_rule(user.tenant_id, id).await?;
    Ok(Json(ApiResponse::success(rule)))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<RuleInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let rule = state.services.approvals.create_rule(&user, payload).await?;
    Ok(created(rule))
}

/// Full replacement, conditions and levels included.
pub async fn update_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RuleInput>,
) -> ApiResult<RuleDetail> {
    let rule = state.services.approvals.update_rule(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(rule)))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    state.services.approvals.delete_rule(&user, id).await?;
    Ok(deleted(id))
}
