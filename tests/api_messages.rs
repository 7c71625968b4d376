//! Message API integration tests
//!
//! Create, edit, delete, list and thread endpoints over the in-memory store.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::TestApp;
use teamchat::shared::event::ServerFrame;

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let app = TestApp::new().await;
    let uri = format!("/api/channels/{}/messages", app.fx.general.id);

    let response = app.get(&uri, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error_code(), "unauthenticated");

    let response = app.send_raw(Method::GET, &uri, Some("not-a-jwt"), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_message() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "hello team").await;

    assert_eq!(view["body"], "hello team");
    assert_eq!(view["channelId"], app.fx.general.id.to_string());
    assert_eq!(view["user"]["id"], app.fx.alice.id.to_string());
    assert_eq!(view["isDeleted"], false);
    assert_eq!(view["thread"]["replyCount"], 0);
    assert_eq!(app.notifier.kinds(), vec!["new_message"]);
}

#[tokio::test]
async fn test_create_message_resolves_mentions() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "@bob can you review?").await;

    let mentions = view["mentions"].as_array().unwrap();
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0]["userId"], app.fx.bob.id.to_string());
    assert_eq!(mentions[0]["displayName"], "bob");
}

#[tokio::test]
async fn test_create_message_rejections() {
    let app = TestApp::new().await;
    let general = format!("/api/channels/{}/messages", app.fx.general.id);

    let response = app.post(&general, &app.fx.alice, json!({ "body": "   " })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "validation_error");

    let token = app.token(&app.fx.alice);
    let response = app
        .send_raw(Method::POST, &general, Some(&token), Some("{".to_string()))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "validation_error");

    let response = app
        .post("/api/channels/not-a-uuid/messages", &app.fx.alice, json!({ "body": "hi" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let missing = format!("/api/channels/{}/messages", Uuid::new_v4());
    let response = app.post(&missing, &app.fx.alice, json!({ "body": "hi" })).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.error_code(), "channel_not_found");

    let secret = app.fx.private_channel("secret", &[app.fx.carol.id]).await;
    let private = format!("/api/channels/{}/messages", secret.id);
    let response = app.post(&private, &app.fx.bob, json!({ "body": "let me in" })).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.error_code(), "not_channel_member");

    assert!(app.notifier.kinds().is_empty());
}

#[tokio::test]
async fn test_unauthorized_edit_changes_nothing() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "original").await;
    let uri = format!("/api/messages/{}", view["id"].as_str().unwrap());

    let response = app.patch(&uri, &app.fx.bob, json!({ "body": "hijacked" })).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.error_code(), "not_message_owner");

    let list = app
        .get(&format!("/api/channels/{}/messages", app.fx.general.id), Some(&app.fx.bob))
        .await;
    assert_eq!(list.body["messages"][0]["body"], "original");
    assert_eq!(app.notifier.kinds(), vec!["new_message"]);
}

#[tokio::test]
async fn test_author_and_owner_can_edit() {
    let app = TestApp::new().await;
    let view = app.post_message(&app.fx.alice, "first draft").await;
    let uri = format!("/api/messages/{}", view["id"].as_str().unwrap());

    let response = app.patch(&uri, &app.fx.alice, json!({ "body": "second draft" })).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["body"], "second draft");
    assert!(response.body["editedAt"].is_string());

    // carol owns the workspace
    let response = app.patch(&uri, &app.fx.carol, json!({ "body": "moderated" })).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["body"], "moderated");
}

#[tokio::test]
async fn test_delete_parent_cascades_to_replies() {
    let app = TestApp::new().await;
    let parent = app.post_message(&app.fx.alice, "release plan").await;
    let parent_id = parent["id"].as_str().unwrap().to_string();

    let uri = format!("/api/channels/{}/messages", app.fx.general.id);
    let reply = app
        .post(&uri, &app.fx.bob, json!({ "body": "looks good", "parentId": parent_id }))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["parentId"], parent_id.as_str());
    assert!(reply.body["thread"].is_null());

    let thread = app
        .get(&format!("/api/messages/{}/thread", parent_id), Some(&app.fx.alice))
        .await;
    assert_eq!(thread.status, StatusCode::OK);
    assert_eq!(thread.body["metadata"]["replyCount"], 1);
    assert_eq!(thread.body["replies"].as_array().unwrap().len(), 1);

    let response = app.delete(&format!("/api/messages/{}", parent_id), &app.fx.alice).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let last = app.notifier.notifications().pop().unwrap();
    match last.frame {
        ServerFrame::MessageDeleted(envelope) => {
            assert_eq!(envelope.channel_id, app.fx.general.id);
            assert_eq!(envelope.message_ids.len(), 2);
        }
        other => panic!("Expected message_deleted, got {:?}", other),
    }

    let thread = app
        .get(&format!("/api/messages/{}/thread", parent_id), Some(&app.fx.alice))
        .await;
    assert_eq!(thread.body["parent"]["isDeleted"], true);
    assert!(thread.body["replies"].as_array().unwrap().is_empty());

    let response = app.delete(&format!("/api/messages/{}", parent_id), &app.fx.alice).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.error_code(), "message_already_deleted");
}

#[tokio::test]
async fn test_list_pagination() {
    let app = TestApp::new().await;
    let mut created = Vec::new();
    for body in ["one", "two", "three"] {
        created.push(app.post_message(&app.fx.alice, body).await);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let base = format!("/api/channels/{}/messages", app.fx.general.id);

    let page = app.get(&format!("{}?limit=2", base), Some(&app.fx.bob)).await;
    assert_eq!(page.status, StatusCode::OK);
    let messages = page.body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "three");
    assert_eq!(page.body["hasMore"], true);

    let until = created[2]["createdAt"].as_str().unwrap().replace('+', "%2B");
    let page = app.get(&format!("{}?until={}", base, until), Some(&app.fx.bob)).await;
    let bodies: Vec<&str> = page.body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["two", "one"]);
    assert_eq!(page.body["hasMore"], false);

    for bad in ["limit=101", "limit=0", "limit=ten", "since=yesterday"] {
        let response = app.get(&format!("{}?{}", base, bad), Some(&app.fx.bob)).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "query {}", bad);
        assert_eq!(response.error_code(), "validation_error");
    }
}

#[tokio::test]
async fn test_list_carries_system_messages() {
    let app = TestApp::new().await;
    app.post_message(&app.fx.alice, "welcome").await;
    let joined = app.fx.member_joined(app.fx.bob.id).await;

    let page = app
        .get(&format!("/api/channels/{}/messages", app.fx.general.id), Some(&app.fx.bob))
        .await;
    assert_eq!(page.status, StatusCode::OK);
    let system = page.body["systemMessages"].as_array().unwrap();
    assert_eq!(system.len(), 1);
    assert_eq!(system[0]["id"], joined.id.to_string());
    assert_eq!(system[0]["kind"], "member_joined");
    assert_eq!(system[0]["payload"]["userId"], app.fx.bob.id.to_string());
    assert_eq!(page.body["messages"].as_array().unwrap().len(), 1);
}
