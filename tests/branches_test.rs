mod common;

use axum::http::StatusCode;
use common::{id_of, TestApp};
use serde_json::{json, Value};

fn emails(members: &Value) -> Vec<String> {
    members["data"]
        .as_array()
        .expect("members")
        .iter()
        .filter_map(|m| m["email"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn slugs_are_unique_per_tenant() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    app.branch("south").await;

    let (status, body) = app
        .post(&app.owner, "/api/v1/branches", json!({ "name": "North again", "slug": "north" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, _) = app
        .put(&app.owner, &format!("/api/v1/branches/{}", north), json!({ "slug": "south" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .put(
            &app.owner,
            &format!("/api/v1/branches/{}", north),
            json!({ "name": "North Yard", "slug": "north-yard" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["slug"], json!("north-yard"));

    let globex = app.register_tenant("globex", "boss@globex.test").await;
    let (status, _) = app
        .post(&globex, "/api/v1/branches", json!({ "name": "North", "slug": "south" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn branches_with_history_cannot_be_deleted() {
    let app = TestApp::new().await;
    let stocked = app.branch("stocked").await;
    let origin = app.branch("origin").await;
    let target = app.branch("target").await;
    let empty = app.branch("empty").await;
    let widget = app.product("W-1", 500).await;
    app.receive(stocked, widget, 4, 100).await;

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": origin,
                "destination_branch_id": target,
                "items": [{ "product_id": widget, "qty": 1 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = app.delete(&app.owner, &format!("/api/v1/branches/{}", stocked)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete(&app.owner, &format!("/api/v1/branches/{}", origin)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete(&app.owner, &format!("/api/v1/branches/{}", target)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.delete(&app.owner, &format!("/api/v1/branches/{}", empty)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, _) = app.get(&app.owner, &format!("/api/v1/branches/{}", empty)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .put(&app.owner, &format!("/api/v1/branches/{}", stocked), json!({ "is_active": false }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["is_active"], json!(false));
}

#[tokio::test]
async fn branch_members_are_added_listed_and_removed() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let editor = app.member("ed@acme.test", "EDITOR").await;
    let members_uri = format!("/api/v1/branches/{}/members", north);

    let (status, list) = app.get(&app.owner, &members_uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(emails(&list).is_empty());

    let (status, body) = app
        .post(&app.owner, &members_uri, json!({ "user_id": editor.user_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let (status, again) = app
        .post(&app.owner, &members_uri, json!({ "user_id": editor.user_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(id_of(&again["data"]), id_of(&body["data"]));

    let outsider = app.register_tenant("globex", "boss@globex.test").await;
    let (status, _) = app
        .post(&app.owner, &members_uri, json!({ "user_id": outsider.user_id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.get(&editor, &members_uri).await;
    assert_eq!(emails(&list), vec!["ed@acme.test".to_string()]);

    let (status, body) = app
        .delete(&app.owner, &format!("{}/{}", members_uri, editor.user_id))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (_, list) = app.get(&app.owner, &members_uri).await;
    assert!(emails(&list).is_empty());

    let (status, _) = app
        .delete(&app.owner, &format!("{}/{}", members_uri, editor.user_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
