mod common;

use axum::http::StatusCode;
use common::{id_of, TestApp};
use serde_json::json;

#[tokio::test]
async fn skus_are_unique_per_tenant() {
    let app = TestApp::new().await;
    let widget = app.product("W-1", 500).await;
    let gadget = app.product("G-1", 700).await;

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/products",
            json!({ "sku": "W-1", "name": "Widget again", "price_cents": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["error"], json!("Conflict"));

    let (status, _) = app
        .put(
            &app.owner,
            &format!("/api/v1/products/{}", gadget),
            json!({ "expected_version": 1, "sku": "W-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, list) = app.get(&app.owner, "/api/v1/products").await;
    assert_eq!(list["data"]["total"], json!(2));
    let (_, detail) = app.get(&app.owner, &format!("/api/v1/products/{}", widget)).await;
    assert_eq!(detail["data"]["name"], json!("Product W-1"));
}

#[tokio::test]
async fn updates_check_and_bump_the_version() {
    let app = TestApp::new().await;
    let widget = app.product("W-1", 500).await;
    let uri = format!("/api/v1/products/{}", widget);

    let (_, detail) = app.get(&app.owner, &uri).await;
    assert_eq!(detail["data"]["entity_version"], json!(1));

    let (status, body) = app
        .put(&app.owner, &uri, json!({ "expected_version": 1, "price_cents": 650 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["entity_version"], json!(2));
    assert_eq!(body["data"]["price_cents"], json!(650));

    let (status, body) = app
        .put(&app.owner, &uri, json!({ "expected_version": 1, "name": "Stale edit" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (_, detail) = app.get(&app.owner, &uri).await;
    assert_eq!(detail["data"]["entity_version"], json!(2));
    assert_eq!(detail["data"]["name"], json!("Product W-1"));

    let (status, _) = app
        .put(&app.owner, &uri, json!({ "expected_version": 2, "price_cents": -1 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn products_with_stock_or_open_transfers_cannot_be_deleted() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let south = app.branch("south").await;
    let stocked = app.product("S-1", 500).await;
    let requested = app.product("R-1", 500).await;
    let idle = app.product("I-1", 500).await;
    app.receive(north, stocked, 3, 100).await;

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": north,
                "destination_branch_id": south,
                "items": [{ "product_id": requested, "qty": 1 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let draft = id_of(&body["data"]);

    let (status, _) = app.delete(&app.owner, &format!("/api/v1/products/{}", stocked)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete(&app.owner, &format!("/api/v1/products/{}", requested)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/cancel", draft), json!({ "reason": "not needed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.delete(&app.owner, &format!("/api/v1/products/{}", requested)).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.delete(&app.owner, &format!("/api/v1/products/{}", idle)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["deleted"], json!(true));
    assert_eq!(id_of(&body["data"]), idle);

    let (status, _) = app.get(&app.owner, &format!("/api/v1/products/{}", idle)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
