use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    Extension,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::product,
    errors::ServiceError,
    handlers::common::{created, deleted, ListQuery},
    services::products::{CreateProduct, UpdateProduct},
    services::Page,
    ApiResponse, ApiResult, AppState,
};

pub async fn list_products(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<product::Model>> {
    let page = query.page_request(&state.config);
    let products = state
        .services
        .products
        .list(user.tenant_id, query.search, page)
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<product::Model> {
    let product = state.services.products.get(user.tenant_id, id).await?;
    Ok(Json(ApiResponse::success(product)))
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateProduct>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.create(&user, payload).await?;
    Ok(created(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProduct>,
) -> ApiResult<product::Model> {
    let product = state.services.products.update(&user, id, payload).await?;
    Ok(Json(ApiResponse::success(product)))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    state.services.products.delete(&user, id).await?;
    Ok(deleted(id))
}
