//! Stockroom API library
//!
//! Multi-tenant inventory administration: branches, a product catalogue,
//! FIFO-costed stock ledgers and approval-gated stock transfers.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};

use crate::auth::consts as perm;
use crate::auth::{AuthRouterExt, AuthService};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires the services together around one connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let auth = Arc::new(AuthService::new(
            auth::AuthConfig::from(&config),
            db.clone(),
        ));
        let services = handlers::AppServices::new(db.clone(), event_sender, auth.clone());
        Self {
            db,
            config,
            services,
            auth,
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: ResponseMeta::capture(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        assert_eq!(response.meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&response.meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn envelope_shape() {
        let value =
            serde_json::to_value(ApiResponse::success(1).with_message("done")).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], 1);
        assert_eq!(value["message"], "done");
        assert!(value["meta"].get("request_id").is_none());
        assert!(value["meta"]["timestamp"].is_string());
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Authenticated `/api/v1` routes, each group gated by one permission.
pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{
        approval_rules, audit, auth as auth_handlers, branches, members, products, roles, stock,
        transfers,
    };

    let me = Router::new()
        .route("/me", get(auth_handlers::me))
        .with_auth();

    let tenant_admin = Router::new()
        .route("/tenant/ownership", post(members::transfer_ownership))
        .with_permission(perm::TENANT_MANAGE);

    let members_manage = Router::new()
        .route("/members", get(members::list_members).post(members::add_member))
        .route("/members/:user_id", delete(members::remove_member))
        .route("/members/:user_id/role", put(members::change_role))
        .with_permission(perm::USERS_MANAGE);

    let roles_manage = Router::new()
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/:id", put(roles::update_role).delete(roles::delete_role))
        .with_permission(perm::ROLES_MANAGE);

    let branches_read = Router::new()
        .route("/branches", get(branches::list_branches))
        .route("/branches/:id", get(branches::get_branch))
        .route("/branches/:id/members", get(branches::list_branch_members))
        .with_auth();

    let branches_manage = Router::new()
        .route("/branches", post(branches::create_branch))
        .route(
            "/branches/:id",
            put(branches::update_branch).delete(branches::delete_branch),
        )
        .route("/branches/:id/members", post(branches::add_branch_member))
        .route(
            "/branches/:id/members/:user_id",
            delete(branches::remove_branch_member),
        )
        .with_permission(perm::BRANCHES_MANAGE);

    let products_read = Router::new()
        .route("/products", get(products::list_products))
        .route("/products/:id", get(products::get_product))
        .with_permission(perm::PRODUCTS_READ);

    let products_write = Router::new()
        .route("/products", post(products::create_product))
        .route(
            "/products/:id",
            put(products::update_product).delete(products::delete_product),
        )
        .with_permission(perm::PRODUCTS_WRITE);

    let stock_read = Router::new()
        .route("/stock/levels", get(stock::stock_levels))
        .route("/stock/ledger", get(stock::stock_ledger))
        .route("/stock/lots", get(stock::stock_lots))
        .with_permission(perm::STOCK_READ);

    let stock_write = Router::new()
        .route("/stock/receive", post(stock::receive_stock))
        .route("/stock/adjust", post(stock::adjust_stock))
        .route("/stock/consume", post(stock::consume_stock))
        .with_permission(perm::STOCK_WRITE);

    // Level decisions are authorized per level by the approval service.
    let transfers_read = Router::new()
        .route("/transfers", get(transfers::list_transfers))
        .route("/transfers/:id", get(transfers::get_transfer))
        .route("/transfers/:id/approval-preview", get(transfers::preview_approval))
        .route(
            "/transfers/:id/approvals/:level/approve",
            post(transfers::approve_level),
        )
        .route(
            "/transfers/:id/approvals/:level/reject",
            post(transfers::reject_level),
        )
        .with_permission(perm::TRANSFERS_READ);

    let transfers_write = Router::new()
        .route("/transfers", post(transfers::create_transfer))
        .route("/transfers/:id/items", put(transfers::update_items))
        .route("/transfers/:id/submit", post(transfers::submit_transfer))
        .route("/transfers/:id/cancel", post(transfers::cancel_transfer))
        .route("/transfers/:id/ship", post(transfers::ship_transfer))
        .route("/transfers/:id/receive", post(transfers::receive_transfer))
        .with_permission(perm::TRANSFERS_WRITE);

    let transfers_approve = Router::new()
        .route("/transfers/:id/review", post(transfers::review_transfer))
        .with_permission(perm::TRANSFERS_APPROVE);

    let transfers_reverse = Router::new()
        .route("/transfers/:id/reverse", post(transfers::reverse_transfer))
        .with_permission(perm::TRANSFERS_REVERSE);

    let approvals_manage = Router::new()
        .route(
            "/approval-rules",
            get(approval_rules::list_rules).post(approval_rules::create_rule),
        )
        .route(
            "/approval-rules/:id",
            get(approval_rules::get_rule)
                .put(approval_rules::update_rule)
                .delete(approval_rules::delete_rule),
        )
        .with_permission(perm::APPROVALS_MANAGE);

    let audit_read = Router::new()
        .route("/audit-events", get(audit::list_audit_events))
        .with_permission(perm::AUDIT_READ);

    Router::new()
        .merge(me)
        .merge(tenant_admin)
        .merge(members_manage)
        .merge(roles_manage)
        .merge(branches_read)
        .merge(branches_manage)
        .merge(products_read)
        .merge(products_write)
        .merge(stock_read)
        .merge(stock_write)
        .merge(transfers_read)
        .merge(transfers_write)
        .merge(transfers_approve)
        .merge(transfers_reverse)
        .merge(approvals_manage)
        .merge(audit_read)
}

/// CORS from config: explicit origins, or permissive where allowed.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            development = cfg.is_development(),
            "using permissive CORS because no origins are configured"
        );
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("no CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// Full application router: health, public auth, the v1 API and the shared
/// middleware stack.
pub fn build_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/auth", handlers::auth::public_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(cors)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        // Inject AuthService into request extensions for auth middleware
        .layer(middleware::from_fn_with_state(
            auth_service,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
