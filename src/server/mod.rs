//! Relay HTTP surface for the Mini App.
//!
//! Routes are mounted once at startup: `/health` and `/send-data`, prefixed
//! with `/api` in production. Every request passes through the panic guard,
//! the request logger and CORS, in that order.

pub mod handlers;
pub mod middleware;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{SecondsFormat, Utc};
use tokio::net::TcpListener;

use crate::bot::BotSession;
use crate::config::{Config, DeploymentMode};

/// Shared handler context.
#[derive(Clone)]
pub struct RelayState {
    pub mode: DeploymentMode,
    bot: Option<Arc<BotSession>>,
}

impl RelayState {
    pub fn new(mode: DeploymentMode, bot: Option<Arc<BotSession>>) -> Self {
        Self { mode, bot }
    }

    pub fn bot_active(&self) -> bool {
        self.bot.is_some()
    }
}

/// UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn router(config: &Config, state: RelayState) -> Result<Router> {
    let cors = middleware::cors_layer(&config.allowed_origins)?;

    let app = Router::new()
        .route(&config.health_path(), get(handlers::health))
        .route(&config.intake_path(), post(handlers::send_data))
        .method_not_allowed_fallback(handlers::not_found)
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(middleware::catch_unhandled(config.mode))
        .with_state(state);

    Ok(app)
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{port}");
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BOT_TOKEN_VAR, FRONTEND_URL_VAR, LOCAL_DEV_ORIGIN, MODE_VAR};
    use crate::platform::{EventHub, Messenger, TransportFault, WebAppKeyboard};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    struct SilentMessenger;

    #[async_trait]
    impl Messenger for SilentMessenger {
        async fn send_message(
            &self,
            _chat_id: i64,
            _text: &str,
            _keyboard: Option<&WebAppKeyboard>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config(mode: &str) -> Config {
        let vars: HashMap<&str, &str> = HashMap::from([
            (BOT_TOKEN_VAR, "123:abc"),
            (FRONTEND_URL_VAR, "https://app.example.com"),
            (MODE_VAR, mode),
        ]);
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
    }

    fn app(mode: &str, with_bot: bool) -> Router {
        let config = config(mode);
        let bot = with_bot.then(|| {
            Arc::new(BotSession::new(
                Arc::new(SilentMessenger),
                config.frontend_url.clone(),
            ))
        });
        router(&config, RelayState::new(config.mode, bot)).unwrap()
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn assert_recent(timestamp: &Value, before: chrono::DateTime<Utc>) {
        let ts = timestamp.as_str().expect("timestamp is a string");
        assert!(ts.ends_with('Z'));
        let parsed = chrono::DateTime::parse_from_rfc3339(ts).unwrap();
        let parsed = parsed.with_timezone(&Utc);
        // Millisecond truncation can put the stamp just before `before`
        assert!(parsed >= before - chrono::Duration::milliseconds(1));
        assert!(parsed <= Utc::now());
    }

    #[tokio::test]
    async fn test_intake_accepts_message_in_development() {
        let before = Utc::now();
        let (status, body) = call(
            app("development", true),
            post("/send-data", r#"{"message":"Hello, Backend!"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Data received successfully!");
        assert_recent(&body["timestamp"], before);
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_intake_rejects_empty_object_in_production() {
        let before = Utc::now();
        let (status, body) = call(app("production", true), post("/api/send-data", "{}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad Request");
        assert_eq!(
            body["message"],
            "Request body must contain a 'message' field"
        );
        assert_recent(&body["timestamp"], before);
        assert_eq!(body.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_intake_rejects_bodies_without_usable_message() {
        let bodies = [
            "",
            "{}",
            r#"{"message":null}"#,
            r#"{"message":""}"#,
            r#"{"message":42}"#,
            r#"["Hello"]"#,
            r#"{"msg":"Hello"}"#,
            "not json",
        ];
        for body in bodies {
            let (status, json) = call(app("development", true), post("/send-data", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body:?}");
            assert_eq!(json["error"], "Bad Request", "body: {body:?}");
        }
    }

    #[tokio::test]
    async fn test_intake_path_follows_mode() {
        let (status, body) = call(
            app("production", true),
            post("/send-data", r#"{"message":"hi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["message"], "Cannot POST /send-data");

        let (status, _) = call(
            app("development", true),
            post("/api/send-data", r#"{"message":"hi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_bot_and_environment() {
        let before = Utc::now();
        let (status, body) = call(app("development", true), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["botActive"], true);
        assert_eq!(body["environment"], "development");
        assert_recent(&body["timestamp"], before);

        let (status, body) = call(app("production", false), get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["botActive"], false);
        assert_eq!(body["environment"], "production");
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origins_only() {
        let preflight = |origin: &str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/send-data")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap()
        };

        for origin in ["https://app.example.com", LOCAL_DEV_ORIGIN] {
            let response = app("development", true)
                .oneshot(preflight(origin))
                .await
                .unwrap();
            let headers = response.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], origin);
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
            let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap();
            assert!(methods.contains("GET") && methods.contains("POST"));
        }

        let response = app("development", true)
            .oneshot(preflight("https://evil.example.net"))
            .await
            .unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_completes_in_flight_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "done"
            }),
        );
        let app = app("development", true).merge(slow);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, app, async {
            let _ = stop_rx.await;
        }));

        let request = tokio::spawn(async move {
            reqwest::get(format!("http://{addr}/slow"))
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();

        assert_eq!(request.await.unwrap(), "done");
        server.await.unwrap().unwrap();

        // Listener is closed once draining finished
        assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_body_gets_json_error() {
        let message = "a".repeat(3 * 1024 * 1024);
        let body = format!(r#"{{"message":"{message}"}}"#);

        let (status, json) = call(app("development", true), post("/send-data", &body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Something went wrong!");
        assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));

        let (status, json) = call(app("production", true), post("/api/send-data", &body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_wrong_method_on_known_route_is_json_not_found() {
        let (status, body) = call(app("development", true), get_req("/send-data")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["message"], "Cannot GET /send-data");

        let (status, body) = call(app("production", true), post("/api/health", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Cannot POST /api/health");
    }

    #[tokio::test]
    async fn test_unset_mode_reports_null_environment() {
        let (status, body) = call(app("", true), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["environment"], Value::Null);

        let (status, _) = call(app("", true), post("/send-data", r#"{"message":"hi"}"#)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_server_keeps_serving_after_transport_fault() {
        let config = config("development");
        let session = Arc::new(BotSession::new(
            Arc::new(SilentMessenger),
            config.frontend_url.clone(),
        ));
        let mut hub = EventHub::new();
        BotSession::register(&session, &mut hub);
        let app = router(&config, RelayState::new(config.mode, Some(session))).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, app, async {
            let _ = stop_rx.await;
        }));

        hub.dispatch_fault(&TransportFault::new("ECONNRESET"));

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["botActive"], true);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(port).await.unwrap_err();
        assert!(err.to_string().contains(&format!("0.0.0.0:{port}")));
    }
}
