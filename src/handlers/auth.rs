use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::post,
    Extension, Router,
};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::created,
    services::tenancy::{Login, Me, RegisterTenant, Session},
    ApiResponse, ApiResult, AppState,
};

/// Public endpoints: tenant sign-up and login.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterTenant>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state.services.tenancy.register_tenant(payload).await?;
    Ok(created(session))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<Login>,
) -> ApiResult<Session> {
    let session = state.services.tenancy.login(payload).await?;
    Ok(Json(ApiResponse::success(session)))
}

pub async fn me(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Me> {
    let me = state.services.tenancy.me(&user).await?;
    Ok(Json(ApiResponse::success(me)))
}
