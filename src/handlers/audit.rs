use axum::{
    extract::{Query, State},
    response::Json,
    Extension,
};

use crate::{
    auth::AuthUser,
    entities::audit_event,
    handlers::common::ListQuery,
    services::audit::AuditFilter,
    services::Page,
    ApiResponse, ApiResult, AppState,
};

pub async fn list_audit_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(paging): Query<ListQuery>,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Page<audit_event::Model>> {
    let page = paging.page_request(&state.config);
    let events = state.services.audit.list(user.tenant_id, filter, page).await?;
    Ok(Json(ApiResponse::success(events)))
}
