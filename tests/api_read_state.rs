//! Read-state API integration tests

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;
use teamchat::shared::event::ServerFrame;

#[tokio::test]
async fn test_unread_count_after_watermark() {
    let app = TestApp::new().await;
    let mut posted = Vec::new();
    for body in ["a", "b", "c"] {
        posted.push(app.post_message(&app.fx.alice, body).await);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let general = app.fx.general.id;

    let response = app
        .post(
            &format!("/api/channels/{}/reads", general),
            &app.fx.bob,
            json!({ "lastReadAt": posted[0]["createdAt"] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["unreadCount"], 2);
    assert_eq!(response.body["channelId"], general.to_string());

    let pushed = app.notifier.notifications().pop().unwrap();
    assert_eq!(pushed.user_id, Some(app.fx.bob.id));
    match pushed.frame {
        ServerFrame::UnreadCount(envelope) => assert_eq!(envelope.count, 2),
        other => panic!("Expected unread_count, got {:?}", other),
    }

    let response = app
        .get(&format!("/api/channels/{}/unread_count", general), Some(&app.fx.bob))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["count"], 2);

    // A deleted message no longer counts
    let last = posted[2]["id"].as_str().unwrap();
    app.delete(&format!("/api/messages/{}", last), &app.fx.alice).await;
    let response = app
        .get(&format!("/api/channels/{}/unread_count", general), Some(&app.fx.bob))
        .await;
    assert_eq!(response.body["count"], 1);

    let response = app.get("/api/unread", Some(&app.fx.bob)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["channels"][general.to_string()], 1);
}

#[tokio::test]
async fn test_never_read_counts_everything() {
    let app = TestApp::new().await;
    app.post_message(&app.fx.alice, "one").await;
    app.post_message(&app.fx.alice, "two").await;

    let response = app
        .get(&format!("/api/channels/{}/unread_count", app.fx.general.id), Some(&app.fx.carol))
        .await;
    assert_eq!(response.body["count"], 2);
}

#[tokio::test]
async fn test_read_state_rejects_bad_timestamp() {
    let app = TestApp::new().await;
    let response = app
        .post(
            &format!("/api/channels/{}/reads", app.fx.general.id),
            &app.fx.bob,
            json!({ "lastReadAt": "last tuesday" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "validation_error");
    assert!(app.notifier.kinds().is_empty());
}

#[tokio::test]
async fn test_read_state_requires_access() {
    let app = TestApp::new().await;
    let secret = app.fx.private_channel("secret", &[app.fx.carol.id]).await;
    let response = app
        .get(&format!("/api/channels/{}/unread_count", secret.id), Some(&app.fx.bob))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}
