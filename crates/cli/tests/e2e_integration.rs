//! End-to-end integration tests for the RVM stack.
//!
//! These wire the operator router, a real controller loop and a scripted
//! hardware gateway together the way `rvm run` does, then drive a kiosk
//! session purely over HTTP.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rvm_config::RvmConfig;
use rvm_controller::{Controller, ControllerHandle};
use rvm_core::error::HardwareError;
use rvm_core::{BeltMotion, HardwareCommand, HardwareEvent, HardwareGateway, ModuleId};
use rvm_gateway::{GatewayState, SharedState, build_router};
use rvm_telemetry::{TelemetryBus, TelemetryTracker};
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Answers photo and weight requests from a script; provisions on request.
struct KioskScript {
    sent: Mutex<Vec<HardwareCommand>>,
    labels: Mutex<VecDeque<(&'static str, f64)>>,
    weights: Mutex<VecDeque<f64>>,
    events: mpsc::UnboundedSender<HardwareEvent>,
}

#[async_trait::async_trait]
impl HardwareGateway for KioskScript {
    fn name(&self) -> &str {
        "kiosk-script"
    }

    async fn send(&self, _module: &ModuleId, command: &HardwareCommand) -> Result<(), HardwareError> {
        self.sent.lock().unwrap().push(command.clone());
        match command {
            HardwareCommand::CapturePhoto => {
                if let Some((label, confidence)) = self.labels.lock().unwrap().pop_front() {
                    let _ = self.events.send(HardwareEvent::Classified {
                        label: label.to_string(),
                        confidence,
                        task_id: None,
                    });
                }
            }
            HardwareCommand::ReadWeight => {
                if let Some(raw) = self.weights.lock().unwrap().pop_front() {
                    let _ = self.events.send(HardwareEvent::Weight { raw });
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn request_module_id(&self) -> Result<(), HardwareError> {
        let _ = self.events.send(HardwareEvent::ModuleReady {
            module_id: ModuleId("07".into()),
        });
        Ok(())
    }
}

struct Stack {
    state: SharedState,
    handle: ControllerHandle,
    kiosk: Arc<KioskScript>,
}

async fn stack() -> Stack {
    let mut config = RvmConfig::default();
    config.weight.coefficient = 1000.0;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let kiosk = Arc::new(KioskScript {
        sent: Mutex::new(Vec::new()),
        labels: Mutex::new(VecDeque::new()),
        weights: Mutex::new(VecDeque::new()),
        events: tx,
    });
    let (controller, handle) = Controller::new(
        Arc::new(config),
        kiosk.clone(),
        TelemetryBus::new(1024),
        Arc::new(TelemetryTracker::default()),
    );

    let feed = handle.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if feed.hardware_event(event).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(controller.run());

    for _ in 0..100 {
        if handle.module_id().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.module_id().is_some(), "controller never provisioned");

    let state = GatewayState::shared(handle.clone(), "RVM-E2E");
    Stack {
        state,
        handle,
        kiosk,
    }
}

fn app(stack: &Stack) -> Router {
    build_router(stack.state.clone())
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn guest(id: &str) -> serde_json::Value {
    serde_json::json!({ "kind": "guest", "session_id": id, "session_code": "E2E" })
}

/// Poll `/v1/status` until `pred` holds, advancing paused time between polls.
async fn wait_status<F>(stack: &Stack, pred: F) -> serde_json::Value
where
    F: Fn(&serde_json::Value) -> bool,
{
    for _ in 0..600 {
        let (status, json) = call(app(stack), get("/v1/status")).await;
        assert_eq!(status, StatusCode::OK);
        if pred(&json) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("status never matched");
}

#[tokio::test(start_paused = true)]
async fn health_reports_provisioned_module() {
    let stack = stack().await;
    let (status, json) = call(app(&stack), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module_id"], "07");
    assert_eq!(json["device_id"], "RVM-E2E");
}

#[tokio::test(start_paused = true)]
async fn guest_session_accepts_a_can_over_http() {
    let stack = stack().await;
    stack.kiosk.labels.lock().unwrap().push_back(("1-can", 0.9));
    stack.kiosk.weights.lock().unwrap().push_back(15.0);

    let (status, json) = call(app(&stack), post_json("/v1/sessions", guest("e2e-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "accepted");

    let json = wait_status(&stack, |s| s["items_processed"] == 1).await;
    assert_eq!(json["session_id"], "e2e-1");
    assert_eq!(json["compactor_running"], true);

    let (status, _) = call(
        app(&stack),
        Request::builder()
            .method("DELETE")
            .uri("/v1/sessions/current")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json = wait_status(&stack, |s| s["state"] == "ready").await;
    assert!(json.get("session_id").is_none());
    assert_eq!(json["compactor_running"], false);
    assert_eq!(json["auto_cycle_enabled"], false);

    let sent = stack.kiosk.sent.lock().unwrap().clone();
    let started = sent
        .iter()
        .position(|c| *c == HardwareCommand::CompactorStart)
        .expect("compactor never started");
    let stopped = sent
        .iter()
        .rposition(|c| *c == HardwareCommand::CompactorStop)
        .expect("compactor never stopped");
    assert!(stopped > started);
    assert!(sent[stopped..].contains(&HardwareCommand::belt(BeltMotion::Stop)));
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_blocks_sessions_until_reset() {
    let stack = stack().await;

    let (status, _) = call(app(&stack), post_json("/v1/emergency-stop", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = call(app(&stack), post_json("/v1/sessions", guest("e2e-2"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["result"], "rejected");

    let (_, json) = call(app(&stack), get("/v1/status")).await;
    assert_eq!(json["state"], "stopped");

    let (status, _) = call(app(&stack), post_json("/v1/reset", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(app(&stack), post_json("/v1/sessions", guest("e2e-2"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn shutdown_makes_the_api_unavailable() {
    let stack = stack().await;
    stack.handle.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (status, json) = call(app(&stack), get("/v1/status")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].is_string());

    let (_, json) = call(app(&stack), get("/health")).await;
    assert_eq!(json["status"], "degraded");
}
