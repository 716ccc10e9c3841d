mod common;

use axum::http::{Method, StatusCode};
use common::{id_of, TestApp};
use rstest::rstest;
use serde_json::{json, Value};

#[rstest]
#[case::viewer_lists_products("VIEWER", Method::GET, "/api/v1/products", None, StatusCode::OK)]
#[case::viewer_reads_levels("VIEWER", Method::GET, "/api/v1/stock/levels", None, StatusCode::OK)]
#[case::viewer_reads_audit("VIEWER", Method::GET, "/api/v1/audit-events", None, StatusCode::OK)]
#[case::viewer_creates_product(
    "VIEWER",
    Method::POST,
    "/api/v1/products",
    Some(json!({ "sku": "V-1", "name": "Nope", "price_cents": 1 })),
    StatusCode::FORBIDDEN
)]
#[case::viewer_lists_rules("VIEWER", Method::GET, "/api/v1/approval-rules", None, StatusCode::FORBIDDEN)]
#[case::editor_creates_product(
    "EDITOR",
    Method::POST,
    "/api/v1/products",
    Some(json!({ "sku": "E-1", "name": "Gadget", "price_cents": 1 })),
    StatusCode::CREATED
)]
#[case::editor_lists_members("EDITOR", Method::GET, "/api/v1/members", None, StatusCode::FORBIDDEN)]
#[case::editor_lists_roles("EDITOR", Method::GET, "/api/v1/roles", None, StatusCode::FORBIDDEN)]
#[case::editor_creates_branch(
    "EDITOR",
    Method::POST,
    "/api/v1/branches",
    Some(json!({ "name": "East", "slug": "east" })),
    StatusCode::FORBIDDEN
)]
#[case::admin_lists_members("ADMIN", Method::GET, "/api/v1/members", None, StatusCode::OK)]
#[case::admin_creates_branch(
    "ADMIN",
    Method::POST,
    "/api/v1/branches",
    Some(json!({ "name": "East", "slug": "east" })),
    StatusCode::CREATED
)]
#[case::admin_lists_rules("ADMIN", Method::GET, "/api/v1/approval-rules", None, StatusCode::OK)]
#[case::admin_hands_over_tenant(
    "ADMIN",
    Method::POST,
    "/api/v1/tenant/ownership",
    Some(json!({ "user_id": uuid::Uuid::nil() })),
    StatusCode::FORBIDDEN
)]
#[tokio::test]
async fn role_gates_endpoint(
    #[case] role: &str,
    #[case] method: Method,
    #[case] uri: &str,
    #[case] body: Option<Value>,
    #[case] expected: StatusCode,
) {
    let app = TestApp::new().await;
    let actor = app
        .member(&format!("{}@acme.test", role.to_lowercase()), role)
        .await;

    let (status, response) = app.request(method, uri, body, Some(&actor.token)).await;
    assert_eq!(status, expected, "{role} {uri}: {response}");
    if status == StatusCode::FORBIDDEN {
        assert_eq!(response["error"], json!("Forbidden"));
    }
}

#[rstest]
#[case::no_token(None)]
#[case::garbage_token(Some("not-a-jwt"))]
#[tokio::test]
async fn missing_or_bad_tokens_are_unauthorized(#[case] token: Option<&str>) {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/api/v1/products", None, token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("Unauthorized"));
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let app = TestApp::new().await;
    let widget = app.product("W-1", 500).await;
    let globex = app.register_tenant("globex", "boss@globex.test").await;
    assert_ne!(globex.tenant_id, app.owner.tenant_id);

    let (status, _) = app.get(&globex, &format!("/api/v1/products/{}", widget)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, list) = app.get(&globex, "/api/v1/products").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"]["total"], json!(0));

    // Same SKU in another tenant is fine.
    let (status, _) = app
        .post(
            &globex,
            "/api/v1/products",
            json!({ "sku": "W-1", "name": "Widget", "price_cents": 100 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn removed_members_lose_access_immediately() {
    let app = TestApp::new().await;
    let viewer = app.member("view@acme.test", "VIEWER").await;

    let (status, _) = app.get(&viewer, "/api/v1/products").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .delete(&app.owner, &format!("/api/v1/members/{}", viewer.user_id))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app.get(&viewer, "/api/v1/products").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_changes_apply_to_existing_tokens() {
    let app = TestApp::new().await;
    let viewer = app.member("view@acme.test", "VIEWER").await;
    let product = json!({ "sku": "P-1", "name": "Pump", "price_cents": 900 });

    let (status, _) = app.post(&viewer, "/api/v1/products", product.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &app.owner,
            &format!("/api/v1/members/{}/role", viewer.user_id),
            json!({ "role_key": "editor" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, created) = app.post(&viewer, "/api/v1/products", product).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");

    let (_, me) = app.get(&viewer, "/api/v1/me").await;
    assert_eq!(me["data"]["role_key"], json!("EDITOR"));
    assert_eq!(id_of(&me["data"]["user"]), viewer.user_id);
}
