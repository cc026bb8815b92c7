//! Events emitted by the orchestrator and its transport

use std::path::PathBuf;

use tokio::sync::broadcast;

use super::session::PipelineState;
use crate::recording::RecordingSummary;

/// Capacity of the event broadcast ring; slow observers see `Lagged`
pub const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    ConnectionSuccess,
    ConnectionFailed(String),
    Disconnected,
    AuthSuccess,
    AuthError,
    RecordingStarted(PathBuf),
    RecordingSaved(RecordingSummary),
}

/// Handle a transport uses to report connection lifecycle, from any thread
#[derive(Clone)]
pub struct ConnectionReporter {
    tx: broadcast::Sender<PipelineEvent>,
}

impl ConnectionReporter {
    pub(crate) fn new(tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    pub fn connected(&self) {
        log::info!("Transport connected");
        self.send(PipelineEvent::ConnectionSuccess);
    }

    pub fn connection_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Transport connection failed: {}", reason);
        self.send(PipelineEvent::ConnectionFailed(reason));
    }

    pub fn disconnected(&self) {
        log::info!("Transport disconnected");
        self.send(PipelineEvent::Disconnected);
    }

    pub fn auth_succeeded(&self) {
        self.send(PipelineEvent::AuthSuccess);
    }

    pub fn auth_failed(&self) {
        log::warn!("Transport authentication failed");
        self.send(PipelineEvent::AuthError);
    }

    fn send(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for ConnectionReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReporter")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
