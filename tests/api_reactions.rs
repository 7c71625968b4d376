//! Reaction API integration tests

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn test_reaction_lifecycle() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "shipped").await;
    let message_id = view["id"].as_str().unwrap();
    let uri = format!("/api/messages/{}/reactions", message_id);

    let response = app.post(&uri, &app.fx.bob, json!({ "emoji": "thumbsup" })).await;
    assert_eq!(response.status, StatusCode::CREATED);
    let reactions = response.body["reactions"].as_array().unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0]["emoji"], "thumbsup");
    assert_eq!(reactions[0]["user"]["id"], app.fx.bob.id.to_string());

    let response = app.post(&uri, &app.fx.bob, json!({ "emoji": "thumbsup" })).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.error_code(), "reaction_exists");

    let response = app.delete(&format!("{}/thumbsup", uri), &app.fx.bob).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.delete(&format!("{}/thumbsup", uri), &app.fx.bob).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.error_code(), "reaction_not_found");

    assert_eq!(
        app.notifier.kinds(),
        vec!["new_message", "message_updated", "message_updated"]
    );
}

#[tokio::test]
async fn test_reaction_on_deleted_message() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "oops").await;
    let message_id = view["id"].as_str().unwrap();

    let response = app.delete(&format!("/api/messages/{}", message_id), &app.fx.alice).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app
        .post(
            &format!("/api/messages/{}/reactions", message_id),
            &app.fx.bob,
            json!({ "emoji": "eyes" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.error_code(), "message_deleted");
}

#[tokio::test]
async fn test_invalid_emoji() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "hello").await;
    let uri = format!("/api/messages/{}/reactions", view["id"].as_str().unwrap());

    let response = app.post(&uri, &app.fx.bob, json!({ "emoji": "" })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}
