mod common;

use axum::http::StatusCode;
use common::{id_of, TestApp};
use serde_json::json;

#[tokio::test]
async fn consume_draws_oldest_lots_first() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;

    for (qty, cost, at) in [(5, 300, "2024-02-01T00:00:00Z"), (5, 100, "2024-01-01T00:00:00Z")] {
        let (status, body) = app
            .post(
                &app.owner,
                "/api/v1/stock/receive",
                json!({
                    "branch_id": north,
                    "product_id": widget,
                    "qty": qty,
                    "unit_cost_cents": cost,
                    "received_at": at,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["lot"]["qty_remaining"], json!(qty));
    }

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/consume",
            json!({ "branch_id": north, "product_id": widget, "qty": 7, "reason": "workshop" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["qty_on_hand"], json!(3));

    let entries = body["data"]["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["qty_delta"], json!(-5));
    assert_eq!(entries[0]["unit_cost_cents"], json!(100));
    assert_eq!(entries[1]["qty_delta"], json!(-2));
    assert_eq!(entries[1]["unit_cost_cents"], json!(300));
    assert!(entries.iter().all(|e| e["kind"] == json!("CONSUMPTION")));

    // Exhausted lots drop out of levels but stay visible under /lots.
    let (_, levels) = app
        .get(&app.owner, &format!("/api/v1/stock/levels?branch_id={}", north))
        .await;
    let level_lots = levels["data"][0]["lots"].as_array().expect("lots");
    assert_eq!(level_lots.len(), 1);
    assert_eq!(level_lots[0]["qty_remaining"], json!(3));

    let (status, lots) = app
        .get(
            &app.owner,
            &format!("/api/v1/stock/lots?branch_id={}&product_id={}", north, widget),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let lots = lots["data"].as_array().expect("lots");
    assert_eq!(lots.len(), 2);
    assert_eq!(lots[0]["qty_remaining"], json!(0));
    assert_eq!(lots[0]["unit_cost_cents"], json!(100));
}

#[tokio::test]
async fn shortfall_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;
    app.receive(north, widget, 4, 100).await;

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/consume",
            json!({ "branch_id": north, "product_id": widget, "qty": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert!(body["request_id"].is_string());

    assert_eq!(app.on_hand(north, widget).await, 4);
    let (_, ledger) = app
        .get(&app.owner, "/api/v1/stock/ledger?kind=CONSUMPTION")
        .await;
    assert_eq!(ledger["data"]["total"], json!(0));
}

#[tokio::test]
async fn adjustments_need_a_reason_and_a_nonzero_delta() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;
    app.receive(north, widget, 10, 100).await;

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/stock/adjust",
            json!({ "branch_id": north, "product_id": widget, "qty_delta": 0, "reason": "count" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/stock/adjust",
            json!({ "branch_id": north, "product_id": widget, "qty_delta": -1, "reason": "  " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/adjust",
            json!({ "branch_id": north, "product_id": widget, "qty_delta": -3, "reason": "breakage" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["qty_on_hand"], json!(7));
    assert_eq!(body["data"]["entries"][0]["kind"], json!("ADJUSTMENT"));
    assert_eq!(body["data"]["entries"][0]["reason"], json!("breakage"));

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/adjust",
            json!({ "branch_id": north, "product_id": widget, "qty_delta": 2, "reason": "found", "unit_cost_cents": 150 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["qty_on_hand"], json!(9));
    assert_eq!(body["data"]["lot"]["qty_received"], json!(2));

    let (_, ledger) = app
        .get(&app.owner, "/api/v1/stock/ledger?kind=ADJUSTMENT")
        .await;
    assert_eq!(ledger["data"]["total"], json!(2));
}

#[tokio::test]
async fn inactive_branches_reject_movements() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;

    let (status, branch) = app.get(&app.owner, &format!("/api/v1/branches/{}", north)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&branch["data"]), north);

    let (status, body) = app
        .put(
            &app.owner,
            &format!("/api/v1/branches/{}", north),
            json!({ "is_active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/stock/receive",
            json!({ "branch_id": north, "product_id": widget, "qty": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn editors_move_stock_only_in_their_branches() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let south = app.branch("south").await;
    let widget = app.product("W-1", 500).await;
    let editor = app.member("ed@acme.test", "EDITOR").await;
    app.join_branch(north, editor.user_id).await;

    let receive = |branch| {
        json!({ "branch_id": branch, "product_id": widget, "qty": 3, "unit_cost_cents": 90 })
    };

    let (status, body) = app.post(&editor, "/api/v1/stock/receive", receive(north)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["entries"][0]["actor_user_id"], json!(editor.user_id));

    let (status, _) = app.post(&editor, "/api/v1/stock/receive", receive(south)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.on_hand(south, widget).await, 0);
}

#[tokio::test]
async fn movements_are_audited() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;
    app.receive(north, widget, 6, 100).await;

    let (status, _) = app
        .post(
            &app.owner,
            "/api/v1/stock/consume",
            json!({ "branch_id": north, "product_id": widget, "qty": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .get(&app.owner, "/api/v1/audit-events?entity_type=product_stock")
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let actions: Vec<&str> = body["data"]["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert!(actions.contains(&"stock.receive"));
    assert!(actions.contains(&"stock.consume"));

    let (_, ledger) = app
        .get(&app.owner, &format!("/api/v1/stock/ledger?product_id={}", widget))
        .await;
    assert_eq!(ledger["data"]["total"], json!(2));
}

#[tokio::test]
async fn quantities_past_the_integer_range_are_rejected() {
    let app = TestApp::new().await;
    let north = app.branch("north").await;
    let widget = app.product("W-1", 500).await;
    app.receive(north, widget, 10, 100).await;

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/adjust",
            json!({ "branch_id": north, "product_id": widget, "qty_delta": i64::MIN, "reason": "typo" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .post(
            &app.owner,
            "/api/v1/stock/receive",
            json!({ "branch_id": north, "product_id": widget, "qty": i64::MAX }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(app.on_hand(north, widget).await, 10);
}
