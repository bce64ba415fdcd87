//! Webhook receiver
//!
//! Routes Graph change and lifecycle notifications to the triggers. Graph
//! validates a new subscription by posting a `validationToken` query
//! parameter, which is echoed back as plain text.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;

use listsync::config::{LIST_NOTIFICATION_PATH, PING_PATH, SUBSCRIPTION_NOTIFICATION_PATH};
use listsync::{ChangeTrigger, LifecycleNotification, LifecycleTrigger};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub change: Arc<ChangeTrigger>,
    pub lifecycle: Arc<LifecycleTrigger>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationQuery {
    validation_token: Option<String>,
}

impl ValidationQuery {
    /// The handshake response, when this request is a subscription validation
    fn handshake(self) -> Option<Response> {
        let token = self.validation_token.filter(|t| !t.is_empty())?;
        log::info!("Answering subscription validation request");
        Some((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], token).into_response())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(LIST_NOTIFICATION_PATH, post(list_notification))
        .route(SUBSCRIPTION_NOTIFICATION_PATH, post(subscription_notification))
        .route(PING_PATH, get(ping))
        .with_state(state)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn list_notification(
    State(state): State<AppState>,
    Query(query): Query<ValidationQuery>,
    body: Bytes,
) -> Response {
    if let Some(response) = query.handshake() {
        return response;
    }

    match state.change.handle_body(&body) {
        Ok(outcome) => {
            log::debug!(
                "Accepted change notification for {} lists ({} entries skipped)",
                outcome.dispatched.len(),
                outcome.rejected.len()
            );
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            log::warn!("Rejected change notification: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn subscription_notification(
    State(state): State<AppState>,
    Query(query): Query<ValidationQuery>,
    body: Bytes,
) -> Response {
    if let Some(response) = query.handshake() {
        return response;
    }

    let notifications = match LifecycleNotification::parse_batch(&body) {
        Ok(notifications) => notifications,
        Err(e) => {
            log::warn!("Rejected lifecycle notification: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Renewal is a blocking Graph call
    let trigger = state.lifecycle.clone();
    match tokio::task::spawn_blocking(move || trigger.handle(&notifications)).await {
        Ok(Ok(renewed)) => {
            log::debug!("Renewed {} subscriptions", renewed.len());
            StatusCode::ACCEPTED.into_response()
        }
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => {
            log::error!("Renewal task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Poll the public ping URL until it answers 200 or `timeout` passes
pub async fn wait_until_reachable(
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> anyhow::Result<()> {
    log::info!("Checking webhook endpoint {}", url);
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(interval.max(Duration::from_secs(2))))
        .build()
        .into();

    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_error = String::from("no response");
    while tokio::time::Instant::now() < deadline {
        let agent = agent.clone();
        let target = url.to_string();
        let attempt = tokio::task::spawn_blocking(move || agent.get(&target).call().map(|r| r.status())).await?;
        match attempt {
            Ok(status) if status.is_success() => {
                log::info!("Webhook endpoint is reachable");
                return Ok(());
            }
            Ok(status) => last_error = format!("HTTP {}", status),
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(interval).await;
    }

    anyhow::bail!(
        "Webhook endpoint {} did not respond within {:?}: {}",
        url,
        timeout,
        last_error
    )
}

/// Resolves when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down"),
        _ = terminate => log::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use listsync::{
        Dispatcher, InMemoryListStore, InMemorySource, ListReconciler, ResourceDescriptor,
        ResourceRef, ResourceSchema, SubscriptionRecord, SubscriptionReconciler, TrackedResource,
    };
    use tower::ServiceExt;

    fn app(source: Arc<InMemorySource>) -> Router {
        let store = Arc::new(InMemoryListStore::new());
        let reconciler = Arc::new(ListReconciler::new(source.clone(), store));
        let dispatcher = Arc::new(Dispatcher::new(reconciler, tokio::runtime::Handle::current()));
        let resources = vec![TrackedResource::new(
            ResourceRef::new("s", "l"),
            ResourceSchema::new("tasks", vec![]),
        )];
        let subscriptions = Arc::new(SubscriptionReconciler::new(
            source,
            "https://hooks/webhook/list-notification",
            "https://hooks/webhook/subscription-notification",
            chrono::Duration::hours(48),
        ));
        router(AppState {
            change: Arc::new(ChangeTrigger::new(&resources, dispatcher)),
            lifecycle: Arc::new(LifecycleTrigger::new(subscriptions)),
        })
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validation_token_is_echoed() {
        let app = app(Arc::new(InMemorySource::new()));
        for path in [LIST_NOTIFICATION_PATH, SUBSCRIPTION_NOTIFICATION_PATH] {
            let response = app
                .clone()
                .oneshot(post_json(&format!("{}?validationToken=abc%20123", path), ""))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
            assert_eq!(body_text(response).await, "abc 123");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_change_notification_status_codes() {
        let app = app(Arc::new(InMemorySource::new()));

        let accepted = r##"{"value": [{"resource": "sites/s/lists/l",
            "resourceData": {"@odata.type": "#Microsoft.Graph.ListItem"}}]}"##;
        let response = app.clone().oneshot(post_json(LIST_NOTIFICATION_PATH, accepted)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Skipped entries do not fail a batch that names a configured list
        let mixed = r#"{"value": [{"resource": "sites/s/lists/other"},
            {"resource": "sites/s/lists/l"}]}"#;
        let response = app.clone().oneshot(post_json(LIST_NOTIFICATION_PATH, mixed)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let unknown = r#"{"value": [{"resource": "sites/s/lists/other"}]}"#;
        let response = app.clone().oneshot(post_json(LIST_NOTIFICATION_PATH, unknown)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(post_json(LIST_NOTIFICATION_PATH, "not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle_status_codes() {
        let source = Arc::new(InMemorySource::new());
        source.insert_subscription(SubscriptionRecord {
            id: "sub-1".to_string(),
            resource: ResourceDescriptor::from("sites/s/lists/l"),
            notification_url: String::new(),
            lifecycle_url: String::new(),
            expires_at: Utc::now(),
        });
        let app = app(source.clone());

        let body = r#"{"value": [{"subscriptionId": "sub-1", "lifecycleEvent": "reauthorizationRequired"}]}"#;
        let response = app.clone().oneshot(post_json(SUBSCRIPTION_NOTIFICATION_PATH, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(source.subscription_calls(), (0, 0, 1));

        let body = r#"{"value": [{"subscriptionId": "nope"}]}"#;
        let response = app.clone().oneshot(post_json(SUBSCRIPTION_NOTIFICATION_PATH, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app.oneshot(post_json(SUBSCRIPTION_NOTIFICATION_PATH, r#"{"value": []}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reachability_check() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(Arc::new(InMemorySource::new()));
        tokio::spawn(async move { axum::serve(listener, app).await });

        let url = format!("http://{}{}", addr, PING_PATH);
        wait_until_reachable(&url, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();

        let missing = format!("http://{}/nowhere", addr);
        let err = wait_until_reachable(&missing, Duration::from_millis(300), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not respond"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_sigterm_triggers_shutdown() {
        let shutdown = tokio::spawn(shutdown_signal());
        // Let the handler register before the signal is raised
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown should follow SIGTERM")
            .unwrap();
    }
}
