mod common;

use axum::http::{Method, StatusCode};
use common::{id_of, TestApp, PASSWORD};
use rstest::rstest;
use serde_json::json;

#[tokio::test]
async fn registration_seeds_roles_and_signs_in_the_owner() {
    let app = TestApp::new().await;

    let (status, me) = app.get(&app.owner, "/api/v1/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["success"], json!(true));
    assert_eq!(me["data"]["role_key"], json!("OWNER"));
    assert_eq!(me["data"]["tenant"]["slug"], json!("acme"));
    assert!(me["data"]["user"].get("password_hash").is_none());
    assert!(me["meta"]["timestamp"].is_string());

    let (_, roles) = app.get(&app.owner, "/api/v1/roles").await;
    let mut keys: Vec<&str> = roles["data"]
        .as_array()
        .expect("roles")
        .iter()
        .filter_map(|r| r["key"].as_str())
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["ADMIN", "EDITOR", "OWNER", "VIEWER"]);

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({
                "tenant_name": "Acme again",
                "tenant_slug": "acme",
                "owner_email": "other@acme.test",
                "owner_password": PASSWORD,
                "owner_name": "Other",
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[rstest]
#[case::wrong_password("owner@acme.test", "not-the-password", "acme")]
#[case::unknown_email("ghost@acme.test", PASSWORD, "acme")]
#[case::unknown_tenant("owner@acme.test", PASSWORD, "initech")]
#[tokio::test]
async fn login_failures_look_alike(#[case] email: &str, #[case] password: &str, #[case] slug: &str) {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": email, "password": password, "tenant_slug": slug })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let message = body["message"].as_str().unwrap_or_default();
    assert!(message.contains("Invalid email, password or tenant"), "{body}");
}

#[tokio::test]
async fn one_account_can_belong_to_several_tenants() {
    let app = TestApp::new().await;
    let globex = app.register_tenant("globex", "owner@acme.test").await;
    assert_eq!(globex.user_id, app.owner.user_id);
    assert_ne!(globex.tenant_id, app.owner.tenant_id);

    let again = app.login("owner@acme.test", "globex").await;
    assert_eq!(again.tenant_id, globex.tenant_id);
}

#[tokio::test]
async fn the_owner_role_is_guarded() {
    let app = TestApp::new().await;
    let admin = app.member("admin@acme.test", "ADMIN").await;

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/members",
            json!({ "email": "boss@acme.test", "password": PASSWORD, "role_key": "OWNER" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/members",
            json!({ "email": "nopass@acme.test", "role_key": "VIEWER" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .put(
            &admin,
            &format!("/api/v1/members/{}/role", app.owner.user_id),
            json!({ "role_key": "VIEWER" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .put(
            &app.owner,
            &format!("/api/v1/members/{}/role", admin.user_id),
            json!({ "role_key": "OWNER" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .delete(&admin, &format!("/api/v1/members/{}", app.owner.user_id))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, members) = app.get(&app.owner, "/api/v1/members").await;
    let owners = members["data"]
        .as_array()
        .expect("members")
        .iter()
        .filter(|m| m["role_key"] == json!("OWNER"))
        .count();
    assert_eq!(owners, 1);
}

#[tokio::test]
async fn ownership_moves_to_another_member() {
    let app = TestApp::new().await;
    let admin = app.member("admin@acme.test", "ADMIN").await;

    let (status, _) = app
        .post(&app.owner, "/api/v1/tenant/ownership", json!({ "user_id": app.owner.user_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(&app.owner, "/api/v1/tenant/ownership", json!({ "user_id": admin.user_id }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, me) = app.get(&admin, "/api/v1/me").await;
    assert_eq!(me["data"]["role_key"], json!("OWNER"));
    let (_, me) = app.get(&app.owner, "/api/v1/me").await;
    assert_eq!(me["data"]["role_key"], json!("ADMIN"));

    let (status, _) = app
        .post(&app.owner, "/api/v1/tenant/ownership", json!({ "user_id": app.owner.user_id }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn custom_roles_are_editable_and_system_roles_are_not() {
    let app = TestApp::new().await;

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/roles",
            json!({ "key": "clerk", "name": "Clerk", "permissions": ["stock:teleport"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/roles",
            json!({ "key": "clerk", "name": "Clerk", "permissions": ["stock:*", "products:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["key"], json!("CLERK"));
    let clerk_role = id_of(&body["data"]);

    let (status, body) = app
        .put(
            &app.owner,
            &format!("/api/v1/roles/{}", clerk_role),
            json!({ "permissions": ["stock:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["permissions"], json!(["stock:read"]));

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/members",
            json!({ "email": "clerk@acme.test", "password": PASSWORD, "role_id": clerk_role }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let clerk = app.login("clerk@acme.test", "acme").await;
    let (status, _) = app.get(&clerk, "/api/v1/products").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.delete(&app.owner, &format!("/api/v1/roles/{}", clerk_role)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, roles) = app.get(&app.owner, "/api/v1/roles").await;
    let viewer_role = roles["data"]
        .as_array()
        .expect("roles")
        .iter()
        .find(|r| r["key"] == json!("VIEWER"))
        .map(id_of)
        .expect("viewer role");
    let (status, _) = app
        .put(&app.owner, &format!("/api/v1/roles/{}", viewer_role), json!({ "name": "Reader" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete(&app.owner, &format!("/api/v1/roles/{}", viewer_role)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .delete(&app.owner, &format!("/api/v1/members/{}", clerk.user_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.delete(&app.owner, &format!("/api/v1/roles/{}", clerk_role)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.get(&app.owner, "/api/v1/products/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (_, body) = app.get(&app.owner, "/api/v1/me").await;
    assert!(body["meta"]["request_id"].is_string());
}
