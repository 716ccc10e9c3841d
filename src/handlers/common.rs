use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::services::PageRequest;
use crate::ApiResponse;

/// Common query parameters for list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub search: Option<String>,
}

impl ListQuery {
    /// Clamps `page`/`limit` against the configured defaults.
    pub fn page_request(&self, config: &AppConfig) -> PageRequest {
        PageRequest::clamped(
            self.page,
            self.limit,
            config.api_default_page_size,
            config.api_max_page_size,
        )
    }
}

/// `201 Created` with the standard envelope.
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Envelope body for deletions.
pub fn deleted(id: Uuid) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({ "id": id, "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "kq7PzR2vXw9LmN4tB8yC1dF6gH3jS5aE0uVbQrT".into(),
            "development".into(),
        );
        cfg.api_default_page_size = 25;
        cfg.api_max_page_size = 50;
        cfg
    }

    #[test]
    fn list_query_uses_configured_defaults() {
        let request = ListQuery::default().page_request(&config());
        assert_eq!(request, PageRequest { page: 1, limit: 25 });
    }

    #[test]
    fn list_query_caps_limit() {
        let query = ListQuery {
            page: Some(3),
            limit: Some(500),
            search: None,
        };
        assert_eq!(query.page_request(&config()), PageRequest { page: 3, limit: 50 });
    }
}
