//! Common test utilities and helpers
//!
//! Builds the full router over a seeded in-memory store and a recording
//! notifier, and drives it one request at a time with `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use teamchat::backend::auth::{create_token, TokenKeys};
use teamchat::backend::messaging::NoopOgpFetcher;
use teamchat::backend::realtime::hub::HubHandle;
use teamchat::backend::realtime::notifier::RecordingNotifier;
use teamchat::backend::routes::create_router;
use teamchat::backend::server::AppState;
use teamchat::backend::store::models::User;
use teamchat::backend::testing::Fixture;
use teamchat::shared::config::AppConfig;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Router plus the fixture and notifier behind it
pub struct TestApp {
    pub fx: Fixture,
    pub notifier: RecordingNotifier,
    router: Router,
    keys: TokenKeys,
}

/// Status and parsed JSON body (`Null` for an empty body)
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let fx = Fixture::new().await;
        let notifier = RecordingNotifier::new();
        let state = AppState::new(
            fx.store(),
            HubHandle::spawn(64),
            Arc::new(notifier.clone()),
            Arc::new(NoopOgpFetcher),
            TokenKeys::from_secret(TEST_SECRET),
            AppConfig::builder().build().expect("default config"),
        );

        Self {
            fx,
            notifier,
            router: create_router(state),
            keys: TokenKeys::from_secret(TEST_SECRET),
        }
    }

    pub fn token(&self, user: &User) -> String {
        create_token(&self.keys, user.id, &user.email, None).expect("Failed to create test token")
    }

    pub async fn get(&self, uri: &str, user: Option<&User>) -> TestResponse {
        self.send(Method::GET, uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: &User, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(user), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, user: &User, body: Value) -> TestResponse {
        self.send(Method::PATCH, uri, Some(user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: &User) -> TestResponse {
        self.send(Method::DELETE, uri, Some(user), None).await
    }

    pub async fn send(&self, method: Method, uri: &str, user: Option<&User>, body: Option<Value>) -> TestResponse {
        let token = user.map(|u| self.token(u));
        self.send_raw(
            method,
            uri,
            token.as_deref(),
            body.map(|b| b.to_string()),
        )
        .await
    }

    /// Send with an explicit token and a raw body string
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<String>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Post `body` to `#general` as `user`, returning the created view
    pub async fn post_message(&self, user: &User, body: &str) -> Value {
        let uri = format!("/api/channels/{}/messages", self.fx.general.id);
        let response = self.post(&uri, user, serde_json::json!({ "body": body })).await;
        assert_eq!(response.status, StatusCode::CREATED, "post failed: {}", response.body);
        response.body
    }
}
