mod common;

use axum::http::StatusCode;
use chrono::{Datelike, Utc};
use common::{id_of, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

struct Floor {
    app: TestApp,
    north: Uuid,
    south: Uuid,
    widget: Uuid,
}

/// Owner-run tenant with two branches and 10@100 + 10@300 widgets at north.
async fn floor() -> Floor {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let south = app.branch("south").await;
    let widget = app.product("W-1", 500).await;
    app.receive(north, widget, 10, 100).await;
    app.receive(north, widget, 10, 300).await;
    Floor { app, north, south, widget }
}

async fn requested(f: &Floor, qty: i64) -> Value {
    let (status, body) = f
        .app
        .post(
            &f.app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": f.north,
                "destination_branch_id": f.south,
                "items": [{ "product_id": f.widget, "qty": qty }],
                "submit": true,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], json!("REQUESTED"));
    body["data"].clone()
}

#[tokio::test]
async fn transfer_runs_from_request_to_reversal() {
    let f = floor().await;
    let app = &f.app;
    let transfer = requested(&f, 15).await;
    let id = id_of(&transfer);
    assert_eq!(
        transfer["transfer_number"],
        json!(format!("TRF-{}-00001", Utc::now().year()))
    );

    let (status, body) = app
        .post(
            &app.owner,
            &format!("/api/v1/transfers/{}/review", id),
            json!({
                "decision": "approve",
                "items": [{ "product_id": f.widget, "qty_approved": 12 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("APPROVED"));
    assert_eq!(body["data"]["items"][0]["qty_approved"], json!(12));

    let (status, body) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/ship", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("SHIPPED"));
    let item = &body["data"]["items"][0];
    assert_eq!(item["qty_shipped"], json!(12));
    // 10 @ 100 and 2 @ 300, rounded.
    assert_eq!(item["unit_cost_cents"], json!(133));
    assert_eq!(item["lot_draws"].as_array().map(Vec::len), Some(2));
    assert_eq!(app.on_hand(f.north, f.widget).await, 8);
    assert_eq!(app.on_hand(f.south, f.widget).await, 0);

    let receive = |qty: i64| json!({ "items": [{ "product_id": f.widget, "qty": qty }] });
    let (status, body) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/receive", id), receive(5))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("PARTIALLY_RECEIVED"));

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/receive", id), receive(8))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/receive", id), receive(7))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("COMPLETED"));
    assert!(body["data"]["completed_at"].is_string());
    assert_eq!(app.on_hand(f.south, f.widget).await, 12);

    let (_, lots) = app
        .get(
            &app.owner,
            &format!("/api/v1/stock/lots?branch_id={}&product_id={}", f.south, f.widget),
        )
        .await;
    assert!(lots["data"]
        .as_array()
        .expect("lots")
        .iter()
        .all(|lot| lot["unit_cost_cents"] == json!(133)));

    let reverse = json!({ "reason": "sent to the wrong store" });
    let (status, body) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/reverse", id), reverse.clone())
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let reversal = body["data"].clone();
    assert_eq!(reversal["status"], json!("COMPLETED"));
    assert_eq!(reversal["reversal_of_transfer_id"], json!(id));
    assert_eq!(reversal["source_branch_id"], json!(f.south));
    assert_eq!(reversal["items"][0]["qty_received"], json!(12));

    let (status, again) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/reverse", id), reverse.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&again["data"]), id_of(&reversal));

    let (status, _) = app
        .post(
            &app.owner,
            &format!("/api/v1/transfers/{}/reverse", id_of(&reversal)),
            reverse,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, original) = app.get(&app.owner, &format!("/api/v1/transfers/{}", id)).await;
    assert_eq!(original["data"]["status"], json!("REVERSED"));
    assert_eq!(original["data"]["reversed_by_transfer_id"], json!(id_of(&reversal)));
    assert_eq!(app.on_hand(f.north, f.widget).await, 20);
    assert_eq!(app.on_hand(f.south, f.widget).await, 0);

    let (_, ledger) = app
        .get(&app.owner, "/api/v1/stock/ledger?kind=REVERSAL")
        .await;
    assert!(ledger["data"]["total"].as_u64().unwrap_or(0) >= 2);
}

#[tokio::test]
async fn illegal_transitions_conflict() {
    let f = floor().await;
    let app = &f.app;
    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": f.north,
                "destination_branch_id": f.south,
                "items": [{ "product_id": f.widget, "qty": 2 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], json!("DRAFT"));
    let id = id_of(&body["data"]);

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/ship", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/cancel", id), json!({ "reason": "not needed" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/submit", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let f = floor().await;
    let app = &f.app;

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": f.north,
                "destination_branch_id": f.north,
                "items": [{ "product_id": f.widget, "qty": 1 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/transfers",
            json!({
                "source_branch_id": f.north,
                "destination_branch_id": f.south,
                "items": [
                    { "product_id": f.widget, "qty": 1 },
                    { "product_id": f.widget, "qty": 2 },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shipping_short_leaves_the_transfer_approved() {
    let f = floor().await;
    let app = &f.app;
    let id = id_of(&requested(&f, 18).await);

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/review", id), json!({ "decision": "approve" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/stock/consume",
            json!({ "branch_id": f.north, "product_id": f.widget, "qty": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/ship", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (_, detail) = app.get(&app.owner, &format!("/api/v1/transfers/{}", id)).await;
    assert_eq!(detail["data"]["status"], json!("APPROVED"));
    assert_eq!(detail["data"]["items"][0]["qty_shipped"], json!(0));
    assert_eq!(app.on_hand(f.north, f.widget).await, 15);
}

#[tokio::test]
async fn rejection_is_terminal() {
    let f = floor().await;
    let app = &f.app;
    let id = id_of(&requested(&f, 3).await);

    let (status, body) = app
        .post(
            &app.owner,
            &format!("/api/v1/transfers/{}/review", id),
            json!({ "decision": "reject", "notes": "stock is reserved" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], json!("REJECTED"));
    assert_eq!(body["data"]["review_notes"], json!("stock is reserved"));

    let (status, _) = app
        .post(&app.owner, &format!("/api/v1/transfers/{}/ship", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn viewers_cannot_request_and_editors_need_the_destination() {
    let f = floor().await;
    let app = &f.app;
    let viewer = app.member("view@acme.test", "VIEWER").await;
    let editor = app.member("ed@acme.test", "EDITOR").await;
    app.join_branch(f.south, editor.user_id).await;

    let body = |source: Uuid, destination: Uuid| {
        json!({
            "source_branch_id": source,
            "destination_branch_id": destination,
            "items": [{ "product_id": f.widget, "qty": 1 }],
        })
    };

    let (status, _) = app.post(&viewer, "/api/v1/transfers", body(f.north, f.south)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.post(&editor, "/api/v1/transfers", body(f.south, f.north)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app.post(&editor, "/api/v1/transfers", body(f.north, f.south)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["data"]["requested_by"], json!(editor.user_id));

    let (status, list) = app
        .get(&viewer, &format!("/api/v1/transfers?branch_id={}&direction=inbound", f.south))
        .await;
    assert_eq!(status, StatusCode::OK, "{list}");
    assert_eq!(list["data"]["total"], json!(1));
}
