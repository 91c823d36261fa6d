use std::any::Any;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::config::DeploymentMode;
use crate::server::handlers::ApiError;
use crate::server::iso_timestamp;

/// Cross-origin access for the listed origins, GET/POST only, with credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub async fn log_request(request: Request, next: Next) -> Response {
    info!(
        "[{}] {} {}",
        iso_timestamp(),
        request.method(),
        request.uri().path()
    );
    next.run(request).await
}

/// Turns a panic inside request handling into a 500 instead of a dropped connection.
#[derive(Debug, Clone, Copy)]
pub struct UnhandledErrorResponse {
    mode: DeploymentMode,
}

fn panic_detail(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

impl ResponseForPanic for UnhandledErrorResponse {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let timestamp = iso_timestamp();
        let detail = panic_detail(err.as_ref());
        error!("[{}] Error: {}", timestamp, detail);
        ApiError::unhandled(self.mode, detail, timestamp).into_response()
    }
}

pub fn catch_unhandled(mode: DeploymentMode) -> CatchPanicLayer<UnhandledErrorResponse> {
    CatchPanicLayer::custom(UnhandledErrorResponse { mode })
}
