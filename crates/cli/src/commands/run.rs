//! `rvm run` — the controller daemon.
//!
//! Wires the local hardware API, the event feed, the controller loop and the
//! operator API together, then waits for a stop signal or a controller fault.

use std::path::Path;
use std::sync::Arc;

use rvm_config::RvmConfig;
use rvm_controller::{Controller, ControllerHandle};
use rvm_core::{BeltMotion, HardwareCommand, HardwareGateway, ModuleId};
use rvm_gateway::GatewayState;
use rvm_hardware::{EventFeed, FeedSignal, LocalApiGateway};
use rvm_telemetry::{Screen, TelemetryBus, TelemetryEvent, TelemetryTracker};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::load_config;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
    no_api: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port_override {
        config.operator.port = port;
    }
    let serve_api = config.operator.enabled && !no_api;

    println!("♻️  RVM Controller — {}", config.device.id);
    println!("   Local API:  {}", config.local_api.base_url);
    println!("   Event feed: {}", config.local_api.ws_url);
    if serve_api {
        println!(
            "   Operator:   http://{}:{}",
            config.operator.host, config.operator.port
        );
    } else {
        println!("   Operator:   disabled");
    }

    let gateway = Arc::new(LocalApiGateway::from_config(&config.local_api)?);
    let bus = TelemetryBus::new(config.telemetry.channel_capacity);
    let tracker = Arc::new(TelemetryTracker::new(config.telemetry.summary_every));
    let config = Arc::new(config);

    let (controller, handle) = Controller::new(
        Arc::clone(&config),
        gateway.clone(),
        bus.clone(),
        Arc::clone(&tracker),
    );

    tokio::spawn(log_telemetry(bus.subscribe()));
    let feed_task = spawn_event_feed(&config, handle.clone());
    let mut controller_task = tokio::spawn(controller.run());

    let (api_stop_tx, mut api_stop_rx) = watch::channel(false);
    let api_task = serve_api.then(|| {
        let state = GatewayState::shared(handle.clone(), config.device.id.clone());
        let operator = config.operator.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = api_stop_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = rvm_gateway::serve(&operator, state, shutdown).await {
                error!(error = %e, "Operator API failed");
            }
        })
    });

    info!("Controller daemon running");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Stop signal received, parking hardware");
            if let Err(e) = handle.shutdown().await {
                warn!(error = %e, "Controller already gone");
            }
            let _ = (&mut controller_task).await;
        }
        result = &mut controller_task => {
            match result {
                Ok(()) => warn!("Controller loop ended unexpectedly"),
                Err(e) => error!(error = %e, "Controller fault"),
            }
            park_hardware(gateway.as_ref(), handle.module_id()).await;
            bus.publish(TelemetryEvent::screen(Screen::OutOfService, "Out of service"));
        }
    }

    let _ = api_stop_tx.send(true);
    if let Some(task) = api_task {
        let _ = task.await;
    }
    feed_task.abort();

    info!("RVM controller stopped");
    Ok(())
}

/// Forward the event feed into the controller until either side goes away.
fn spawn_event_feed(config: &RvmConfig, handle: ControllerHandle) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let feed = EventFeed::from_config(&config.local_api).spawn(tx);

    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let sent = match signal {
                FeedSignal::Connected => handle.feed_connected().await,
                FeedSignal::Disconnected => {
                    warn!("Hardware event feed disconnected");
                    Ok(())
                }
                FeedSignal::Event(event) => handle.hardware_event(event).await,
            };
            if sent.is_err() {
                break;
            }
        }
        feed.abort();
    })
}

/// Mirror telemetry into the log.
async fn log_telemetry(mut rx: broadcast::Receiver<Arc<TelemetryEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.as_ref() {
                TelemetryEvent::Status(_) | TelemetryEvent::WeightResult { .. } => {
                    debug!(kind = event.kind(), "telemetry")
                }
                other => {
                    let json = serde_json::to_string(other).unwrap_or_default();
                    info!(kind = event.kind(), event = %json, "telemetry");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Telemetry log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Last-resort park when the controller is gone: nothing may keep moving.
async fn park_hardware(gateway: &dyn HardwareGateway, module: Option<ModuleId>) {
    let Some(module) = module else {
        return;
    };
    for command in [
        HardwareCommand::CompactorStop,
        HardwareCommand::belt(BeltMotion::Stop),
        HardwareCommand::CloseGate,
    ] {
        if let Err(e) = gateway.send(&module, &command).await {
            warn!(action = command.action(), error = %e, "Park command failed");
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        _ => {
            warn!("Could not register signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}
