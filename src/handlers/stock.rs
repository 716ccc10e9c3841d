use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
    Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{stock_ledger, stock_lot},
    errors::ServiceError,
    handlers::common::{created, ListQuery},
    services::stock::{AdjustStock, ConsumeStock, LedgerFilter, ReceiveStock, StockLevel, StockMovement},
    services::Page,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct LevelsQuery {
    pub branch_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LotsQuery {
    pub branch_id: Uuid,
    pub product_id: Uuid,
}

pub async fn receive_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ReceiveStock>,
) -> Result<impl IntoResponse, ServiceError> {
    let movement = state.services.stock.receive(&user, payload).await?;
    Ok(created(movement))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AdjustStock>,
) -> ApiResult<StockMovement> {
    let movement = state.services.stock.adjust(&user, payload).await?;
    Ok(Json(ApiResponse::success(movement)))
}

pub async fn consume_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ConsumeStock>,
) -> ApiResult<StockMovement> {
    let movement = state.services.stock.consume(&user, payload).await?;
    Ok(Json(ApiResponse::success(movement)))
}

pub async fn stock_levels(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LevelsQuery>,
) -> ApiResult<Vec<StockLevel>> {
    let levels = state
        .services
        .stock
        .levels(user.tenant_id, query.branch_id, query.product_id)
        .await?;
    Ok(Json(ApiResponse::success(levels)))
}

/// Ledger entries, newest first. Filters and paging share one query string.
pub async fn stock_ledger(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(paging): Query<ListQuery>,
    Query(filter): Query<LedgerFilter>,
) -> ApiResult<Page<stock_ledger::Model>> {
    let page = paging.page_request(&state.config);
    let entries = state.services.stock.ledger(user.tenant_id, filter, page).await?;
    Ok(Json(ApiResponse::success(entries)))
}

pub async fn stock_lots(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LotsQuery>,
) -> ApiResult<Vec<stock_lot::Model>> {
    let lots = state
        .services
        .stock
        .lots(user.tenant_id, query.branch_id, query.product_id)
        .await?;
    Ok(Json(ApiResponse::success(lots)))
}
