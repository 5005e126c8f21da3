//! Operator HTTP API for the RVM controller.
//!
//! Exposes a health check and the v1 operator API: status and bin queries,
//! session control, emergency stop, the generic command channel and a live
//! telemetry stream over SSE and WebSocket.
//!
//! Built on Axum. Every request becomes an operator command on the
//! controller handle; the gateway holds no machine state of its own.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use rvm_config::OperatorConfig;
use rvm_controller::ControllerHandle;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub handle: ControllerHandle,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn shared(handle: ControllerHandle, device_id: impl Into<String>) -> SharedState {
        Arc::new(Self {
            handle,
            device_id: device_id.into(),
            start_time: Utc::now(),
        })
    }
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - CORS limited to local dashboards
/// - Request body size limit (64 KB; commands are small)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(|origin, _| {
            origin
                .to_str()
                .map(|o| o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1"))
                .unwrap_or(false)
        }))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the operator API until `shutdown` resolves.
pub async fn serve(
    config: &OperatorConfig,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);

    info!(addr = %addr, "Operator API listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    device_id: String,
    controller_running: bool,
    module_id: Option<String>,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let running = state.handle.is_running();
    Json(HealthResponse {
        status: if running { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        device_id: state.device_id.clone(),
        controller_running: running,
        module_id: state.handle.module_id().map(|m| m.0),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rvm_config::RvmConfig;
    use rvm_controller::Controller;
    use rvm_core::error::HardwareError;
    use rvm_core::{HardwareCommand, HardwareGateway, ModuleId};
    use rvm_telemetry::{TelemetryBus, TelemetryTracker};
    use tower::ServiceExt;

    /// Accepts every command; never volunteers a module id.
    struct NullGateway;

    #[async_trait]
    impl HardwareGateway for NullGateway {
        fn name(&self) -> &str {
            "null"
        }

        async fn send(&self, _: &ModuleId, _: &HardwareCommand) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn request_module_id(&self) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    /// A running controller behind a fresh gateway state.
    pub(crate) fn test_state() -> SharedState {
        let config = Arc::new(RvmConfig::default());
        let (controller, handle) = Controller::new(
            config,
            Arc::new(NullGateway),
            TelemetryBus::default(),
            Arc::new(TelemetryTracker::default()),
        );
        tokio::spawn(controller.run());
        GatewayState::shared(handle, "RVM-TEST")
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["device_id"], "RVM-TEST");
        assert!(json["module_id"].is_null());
    }

    #[tokio::test]
    async fn v1_is_nested() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/detection")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/nope")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
