//! HTTP tests for `POST /api/v1/admin/games/modify`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::StatusCode;
use common::{game_json, zip_of, TestApp, ADMIN_TOKEN};
use serde_json::json;

const MODIFY: &str = "/api/v1/admin/games/modify";

/// App with the 2018 WUCC game already imported
async fn app_with_game() -> TestApp {
    let app = TestApp::new();
    app.upload(zip_of(&[("wucc.json", &game_json("wucc", 2018))]), Some(ADMIN_TOKEN))
        .await;
    app.drain_jobs().await;
    assert_eq!(app.games.game_count().await, 1);
    app
}

#[tokio::test]
async fn test_modify_game() {
    let app = app_with_game().await;

    let (status, body) = app
        .post_json(
            MODIFY,
            json!({
                "short_name": "WUCC",
                "game_year": "2018",
                "eid": 1234,
                "start_date": "2018-07-14",
                "end_date": "2018-07-21",
                "results_url": "https://example.org/wucc/2018/results",
                "standings_url": "",
            }),
            Some(ADMIN_TOKEN),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Game updated.");
    let game = &body["data"]["game"];
    assert_eq!(game["event_short_name"], "wucc");
    assert_eq!(game["eid"], 1234);
    assert_eq!(game["start_date"], "2018-07-14");
    assert_eq!(game["results_url"], "https://example.org/wucc/2018/results");
    assert!(game["standings_url"].is_null());
}

#[tokio::test]
async fn test_modify_requires_admin() {
    let app = app_with_game().await;

    let (status, body) = app
        .post_json(MODIFY, json!({ "short_name": "wucc", "game_year": 2018, "eid": 1 }), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "You are not allowed to create events.");
}

#[tokio::test]
async fn test_modify_unknown_event_and_year() {
    let app = app_with_game().await;

    let (status, body) = app
        .post_json(
            MODIFY,
            json!({ "short_name": "euc", "game_year": 2018, "eid": 1 }),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Event not found: euc");

    let (status, body) = app
        .post_json(
            MODIFY,
            json!({ "short_name": "wucc", "game_year": 2014, "eid": 1 }),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "No game for year 2014");
}

#[tokio::test]
async fn test_modify_validation() {
    let app = app_with_game().await;

    for patch in [
        json!({ "short_name": "wucc", "game_year": 2018 }),
        json!({ "short_name": "wucc", "game_year": 2018, "eid": -4 }),
        json!({ "short_name": "wucc", "game_year": 2018, "start_date": "July 14" }),
        json!({ "short_name": "wucc", "game_year": 2018, "awards_url": "javascript:alert(1)" }),
        json!({ "short_name": "wucc", "game_year": 2018,
                "start_date": "2018-07-21", "end_date": "2018-07-14" }),
        json!({ "game_year": 2018, "eid": 3 }),
    ] {
        let (status, body) = app.post_json(MODIFY, patch.clone(), Some(ADMIN_TOKEN)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} should be rejected", patch);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}
