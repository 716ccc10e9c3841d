use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::stock_transfer,
    errors::ServiceError,
    handlers::common::{created, ListQuery},
    services::approvals::{LevelDecision, RuleDetail},
    services::transfers::{
        Cancel, CreateTransfer, Receive, Reverse, Review, TransferDetail, TransferFilter,
        UpdateItems,
    },
    services::Page,
    ApiResponse, ApiResult, AppState,
};

pub async fn list_transfers(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(paging): Query<ListQuery>,
    Query(filter): Query<TransferFilter>,
) -> ApiResult<Page<stock_transfer::Model>> {
    let page = paging.page_request(&state.config);
    let transfers = state.services.transfers.list(&user, filter, page).await?;
    Ok(Json(ApiResponse::success(transfers)))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.get(&user, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateTransfer>,
) -> Result<impl IntoResponse, ServiceError> {
    let transfer = state.services.transfers.create(&user, payload).await?;
    Ok(created(transfer))
}

pub async fn update_items(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateItems>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.update_items(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn submit_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.submit(&user, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn review_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Review>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.review(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

/// The body is optional; an empty request cancels without a reason.
pub async fn cancel_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Option<Json<Cancel>>,
) -> ApiResult<TransferDetail> {
    let cancel = payload.map(|Json(c)| c).unwrap_or_default();
    let transfer = state.services.transfers.cancel(&user, id, cancel).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn ship_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.ship(&user, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn receive_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Receive>,
) -> ApiResult<TransferDetail> {
    let transfer = state.services.transfers.receive(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

/// Returns the reversal transfer, whether new or previously created.
pub async fn reverse_transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Reverse>,
) -> ApiResult<TransferDetail> {
    let reversal = state.services.transfers.reverse(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(reversal)))
}

pub async fn approve_level(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, level)): Path<(Uuid, i32)>,
    payload: Option<Json<LevelDecision>>,
) -> ApiResult<TransferDetail> {
    let decision = payload.map(|Json(d)| d).unwrap_or_default();
    let transfer = state
        .services
        .approvals
        .approve_level(&user, id, level, decision)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn reject_level(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, level)): Path<(Uuid, i32)>,
    payload: Option<Json<LevelDecision>>,
) -> ApiResult<TransferDetail> {
    let decision = payload.map(|Json(d)| d).unwrap_or_default();
    let transfer = state
        .services
        .approvals
        .reject_level(&user, id, level, decision)
        .await?;
    Ok(Json(ApiResponse::success(transfer)))
}

/// Which approval rule would govern this transfer right now, if any.
pub async fn preview_approval(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Option<RuleDetail>> {
    let rule = state.services.approvals.evaluate(user.tenant_id, id).await?;
    Ok(Json(ApiResponse::success(rule)))
}
