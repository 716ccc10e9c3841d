#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use stockroom_api::{
    config::AppConfig,
    db,
    events::{self, EventSender},
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";
const JWT_SECRET: &str = "kq7PzR2vXw9LmN4tB8yC1dF6gH3jS5aE0uVbQrT";

/// A signed-in member of a tenant.
#[derive(Debug, Clone)]
pub struct Actor {
    pub token: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
}

/// Router over a fresh SQLite database with one registered tenant, `acme`,
/// whose owner is `owner`.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub owner: Actor,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("stockroom_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = AppState::new(std::sync::Arc::new(pool), cfg, EventSender::new(event_tx));
        let router = stockroom_api::build_router(state.clone());

        let mut app = Self {
            router,
            state,
            owner: Actor {
                token: String::new(),
                user_id: Uuid::nil(),
                tenant_id: Uuid::nil(),
                email: String::new(),
            },
            _db_dir: db_dir,
            _event_task: event_task,
        };
        app.owner = app.register_tenant("acme", "owner@acme.test").await;
        app
    }

    /// Sends a request and returns the status with the JSON body (`Null`
    /// when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn get(&self, actor: &Actor, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, Some(&actor.token)).await
    }

    pub async fn post(&self, actor: &Actor, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), Some(&actor.token))
            .await
    }

    pub async fn put(&self, actor: &Actor, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body), Some(&actor.token))
            .await
    }

    pub async fn delete(&self, actor: &Actor, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None, Some(&actor.token))
            .await
    }

    pub async fn register_tenant(&self, slug: &str, owner_email: &str) -> Actor {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                Some(json!({
                    "tenant_name": format!("{} Ltd", slug),
                    "tenant_slug": slug,
                    "owner_email": owner_email,
                    "owner_password": PASSWORD,
                    "owner_name": "Owner",
                })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        session_actor(&body["data"], owner_email)
    }

    pub async fn login(&self, email: &str, tenant_slug: &str) -> Actor {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/login",
                Some(json!({ "email": email, "password": PASSWORD, "tenant_slug": tenant_slug })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        session_actor(&body["data"], email)
    }

    /// Adds a member to `acme` with a system role and signs them in.
    pub async fn member(&self, email: &str, role_key: &str) -> Actor {
        let (status, body) = self
            .post(
                &self.owner,
                "/api/v1/members",
                json!({
                    "email": email,
                    "name": email.split('@').next().unwrap_or("member"),
                    "password": PASSWORD,
                    "role_key": role_key,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "add member failed: {body}");
        self.login(email, "acme").await
    }

    pub async fn branch(&self, slug: &str) -> Uuid {
        let (status, body) = self
            .post(
                &self.owner,
                "/api/v1/branches",
                json!({ "name": slug.to_uppercase(), "slug": slug }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create branch failed: {body}");
        id_of(&body["data"])
    }

    pub async fn join_branch(&self, branch_id: Uuid, user_id: Uuid) {
        let (status, body) = self
            .post(
                &self.owner,
                &format!("/api/v1/branches/{}/members", branch_id),
                json!({ "user_id": user_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "join branch failed: {body}");
    }

    pub async fn product(&self, sku: &str, price_cents: i64) -> Uuid {
        let (status, body) = self
            .post(
                &self.owner,
                "/api/v1/products",
                json!({ "sku": sku, "name": format!("Product {}", sku), "price_cents": price_cents }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create product failed: {body}");
        id_of(&body["data"])
    }

    pub async fn receive(&self, branch_id: Uuid, product_id: Uuid, qty: i64, unit_cost_cents: i64) {
        let (status, body) = self
            .post(
                &self.owner,
                "/api/v1/stock/receive",
                json!({
                    "branch_id": branch_id,
                    "product_id": product_id,
                    "qty": qty,
                    "unit_cost_cents": unit_cost_cents,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "receive failed: {body}");
    }

    pub async fn on_hand(&self, branch_id: Uuid, product_id: Uuid) -> i64 {
        let (status, body) = self
            .get(
                &self.owner,
                &format!(
                    "/api/v1/stock/levels?branch_id={}&product_id={}",
                    branch_id, product_id
                ),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "levels failed: {body}");
        body["data"]
            .as_array()
            .and_then(|levels| levels.first())
            .and_then(|level| level["qty_on_hand"].as_i64())
            .unwrap_or(0)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn id_of(value: &Value) -> Uuid {
    value["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("no id in {value}"))
}

fn session_actor(session: &Value, email: &str) -> Actor {
    Actor {
        token: session["access_token"]
            .as_str()
            .expect("access token")
            .to_string(),
        user_id: id_of(&session["user"]),
        tenant_id: id_of(&session["tenant"]),
        email: email.to_string(),
    }
}
