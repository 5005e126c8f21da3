//! Cloneable handle for talking to a running controller.

use std::sync::Arc;

use rvm_core::error::CommandError;
use rvm_core::{HardwareEvent, ModuleId, OperatorCommand};
use rvm_telemetry::{TelemetryBus, TelemetryEvent, TelemetryTracker};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::input::{CommandOutcome, Input};

/// Every ingress (event feed, operator API, CLI) goes through one of these.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Input>,
    module_rx: watch::Receiver<Option<ModuleId>>,
    bus: TelemetryBus,
    tracker: Arc<TelemetryTracker>,
}

impl ControllerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<Input>,
        module_rx: watch::Receiver<Option<ModuleId>>,
        bus: TelemetryBus,
        tracker: Arc<TelemetryTracker>,
    ) -> Self {
        Self {
            tx,
            module_rx,
            bus,
            tracker,
        }
    }

    async fn send(&self, input: Input) -> Result<(), CommandError> {
        self.tx
            .send(input)
            .await
            .map_err(|_| CommandError::ControllerGone)
    }

    /// Run an operator command and wait for its outcome.
    pub async fn command(&self, command: OperatorCommand) -> Result<CommandOutcome, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Command {
            command,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| CommandError::ControllerGone)
    }

    /// Queue an operator command without waiting for it.
    pub async fn submit(&self, command: OperatorCommand) -> Result<(), CommandError> {
        self.send(Input::Command {
            command,
            reply: None,
        })
        .await
    }

    pub async fn hardware_event(&self, event: HardwareEvent) -> Result<(), CommandError> {
        self.send(Input::Hardware(event)).await
    }

    pub async fn feed_connected(&self) -> Result<(), CommandError> {
        self.send(Input::FeedConnected).await
    }

    /// Park the hardware and stop the controller loop. Resolves once done.
    pub async fn shutdown(&self) -> Result<(), CommandError> {
        let (done, rx) = oneshot::channel();
        self.send(Input::Shutdown { done }).await?;
        rx.await.map_err(|_| CommandError::ControllerGone)
    }

    pub fn module_id(&self) -> Option<ModuleId> {
        self.module_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetryEvent>> {
        self.bus.subscribe()
    }

    pub fn telemetry(&self) -> &TelemetryBus {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<TelemetryTracker> {
        &self.tracker
    }
}
