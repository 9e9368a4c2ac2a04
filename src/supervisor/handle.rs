//! Public handle to a supervised detector channel.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::{Request, SupervisorWorker};
use crate::config::DetectorConfig;
use crate::supervisor::ReadinessState;

/// Supervisor for an external line-detection process.
///
/// All channel work happens on a dedicated worker task; the handle's methods
/// never block and never fail. Failures degrade to "not ready": commands are
/// queued and the channel is restarted on the next call.
#[derive(Debug)]
pub struct LineDetectorSupervisor {
    requests: mpsc::UnboundedSender<Request>,
    reading: Arc<AtomicI32>,
    state_rx: watch::Receiver<ReadinessState>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl LineDetectorSupervisor {
    /// Spawn the worker task for `config`.
    ///
    /// The channel starts Uninitialized; nothing is launched until the first
    /// call to [`ensure_initialized`](Self::ensure_initialized) or
    /// [`request_detection`](Self::request_detection).
    #[must_use]
    pub fn spawn(config: DetectorConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadinessState::Uninitialized);
        let reading = Arc::new(AtomicI32::new(0));
        let cancel = CancellationToken::new();

        let worker = SupervisorWorker::new(
            config,
            requests_rx,
            state_tx,
            Arc::clone(&reading),
            cancel.clone(),
        );
        let worker = tokio::spawn(worker.run());

        Self {
            requests: requests_tx,
            reading,
            state_rx,
            cancel,
            worker,
        }
    }

    /// Bring the channel up if it is not up already. Idempotent: a ready
    /// channel is only re-verified, never respawned or reopened.
    pub fn ensure_initialized(&self) {
        self.send(Request::EnsureReady);
    }

    /// Queue a `detect` command.
    ///
    /// Delivered immediately when the channel is ready; otherwise it waits in
    /// the queue and goes out after the next successful (re)start.
    pub fn request_detection(&self) {
        self.send(Request::Detect);
    }

    /// Last successfully parsed line position. Never blocks, never fails;
    /// zero until the first record arrives.
    #[must_use]
    pub fn current_reading(&self) -> i32 {
        self.reading.load(Ordering::Relaxed)
    }

    /// Current channel readiness.
    #[must_use]
    pub fn state(&self) -> ReadinessState {
        *self.state_rx.borrow()
    }

    /// Watch channel following readiness transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    /// Tear the channel down: pipes first, then the detector process.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.worker).await {
            tracing::warn!(error = %e, "supervisor worker did not exit cleanly");
        }
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            tracing::warn!(?request, "supervisor worker is gone");
        }
    }
}

impl Drop for LineDetectorSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
