//! Event-loop worker that owns the detector channel.
//!
//! Everything that mutates channel state runs on this single task: caller
//! requests, console output, pipe readability and the open-retry timer are
//! serialized through one `select!` loop, so the state machine, the queue and
//! the pipe handles need no locking.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::DetectorConfig;
use crate::pipes::{DetectorPipes, PipeError};
use crate::process::{
    self, DetectorProcess, DetectorProcessBuilder, ProcessEvent, DEFAULT_CONSOLE_BUFFER,
};
use crate::protocol::{self, DetectorRecord, ProcessSignal};
use crate::supervisor::{ChannelStateMachine, CommandQueue, ReadinessState};

/// Command sent to the detector to trigger one detection pass.
pub const DETECT_COMMAND: &str = "detect";

/// Timeout for graceful detector termination at shutdown.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between attempts to open the pipes after the serving-loop signal.
///
/// The detector announces its serving loop slightly before its pipe ends are
/// guaranteed to exist, so the open is retried on a timer instead of sleeping
/// a fixed settle time after spawn.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Attempts to open the pipes before the channel faults.
const MAX_OPEN_ATTEMPTS: u32 = 50;

/// Consecutive failed reads tolerated before the channel faults.
const MAX_READ_FAILURES: u32 = 3;

/// A caller request relayed to the worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    /// Bring the channel up if it is not already up.
    EnsureReady,
    /// Queue a detection command and deliver it as soon as possible.
    Detect,
}

/// The worker task behind a [`crate::supervisor::LineDetectorSupervisor`].
pub(crate) struct SupervisorWorker {
    config: DetectorConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    state: ChannelStateMachine,
    state_tx: watch::Sender<ReadinessState>,
    queue: CommandQueue,
    pipes: DetectorPipes,
    process: Option<DetectorProcess>,
    console: Option<mpsc::Receiver<ProcessEvent>>,
    reading: Arc<AtomicI32>,
    open_attempts: u32,
    read_failures: u32,
    retry_at: Option<Instant>,
    cancel: CancellationToken,
}

impl SupervisorWorker {
    pub(crate) fn new(
        config: DetectorConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        state_tx: watch::Sender<ReadinessState>,
        reading: Arc<AtomicI32>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            requests,
            state: ChannelStateMachine::new(),
            state_tx,
            queue: CommandQueue::new(),
            pipes: DetectorPipes::new(),
            process: None,
            console: None,
            reading,
            open_attempts: 0,
            read_failures: 0,
            retry_at: None,
            cancel,
        }
    }

    /// Drive the channel until cancellation or until every handle is gone.
    pub(crate) async fn run(mut self) {
        loop {
            let cancel = self.cancel.clone();
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }

                // Records drain before console sentinels: a teardown racing
                // the detector's final output must not discard a reading that
                // already reached the pipe.
                () = self.pipes.readable() => {
                    self.handle_readable();
                }

                event = recv_console(self.console.as_mut()) => {
                    match event {
                        Some(event) => self.handle_console_event(event),
                        None => self.on_process_exited(),
                    }
                }

                request = self.requests.recv() => {
                    match request {
                        Some(request) => self.handle_request(request),
                        None => {
                            // Every handle is gone; nothing can reach the
                            // channel anymore.
                            self.shutdown().await;
                            return;
                        }
                    }
                }

                () = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    self.open_pipes();
                }
            }
        }
    }

    fn transition(&mut self, state: ReadinessState) {
        self.state.transition(state);
        self.state_tx.send_replace(state);
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::EnsureReady => self.ensure_ready(),
            Request::Detect => {
                self.queue.push(DETECT_COMMAND);
                self.ensure_ready();
                self.flush_queue();
            }
        }
    }

    /// Idempotent readiness check: a ready channel is only re-verified, an
    /// initializing one is left alone and a dead one is restarted.
    fn ensure_ready(&mut self) {
        match self.state.state() {
            ReadinessState::Ready => {
                // The detector can die without any OS-level error surfacing,
                // so a missing FIFO is as authoritative as a crash callback.
                if !self.config.inbound_pipe.exists() || !self.config.outbound_pipe.exists() {
                    tracing::warn!("detector pipes vanished while ready, restarting");
                    self.fault();
                    self.start_detector();
                }
            }
            ReadinessState::StartingProcess
            | ReadinessState::AwaitingProcessSignal
            | ReadinessState::OpeningPipes => {}
            ReadinessState::Uninitialized | ReadinessState::Faulted => self.start_detector(),
        }
    }

    fn start_detector(&mut self) {
        self.transition(ReadinessState::StartingProcess);

        // A child left over from a previous incarnation must not keep the
        // pipe ends busy.
        if let Some(mut stale) = self.process.take() {
            if let Err(e) = stale.start_kill() {
                tracing::debug!(error = %e, "stale detector already gone");
            }
        }
        self.console = None;

        let builder = DetectorProcessBuilder::new(self.config.binary.as_path())
            .params(self.config.params.as_str());
        tracing::info!(binary = %self.config.binary.display(), "starting detector");

        match DetectorProcess::spawn(&builder) {
            Ok(mut process) => match (process.take_stdout(), process.take_stderr()) {
                (Some(stdout), Some(stderr)) => {
                    self.console = Some(process::spawn_readers(
                        stdout,
                        stderr,
                        DEFAULT_CONSOLE_BUFFER,
                    ));
                    self.process = Some(process);
                    self.transition(ReadinessState::AwaitingProcessSignal);
                }
                _ => {
                    tracing::error!("detector console streams unavailable");
                    self.transition(ReadinessState::Faulted);
                }
            },
            Err(e) => {
                tracing::error!(
                    binary = %self.config.binary.display(),
                    error = %e,
                    "cannot launch detector"
                );
                self.transition(ReadinessState::Faulted);
            }
        }
    }

    fn handle_console_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Stdout(line) => {
                tracing::debug!(line = %line, "detector");
                match ProcessSignal::classify(&line) {
                    ProcessSignal::ServingLoop => {
                        self.open_attempts = 0;
                        self.open_pipes();
                    }
                    ProcessSignal::Terminating => {
                        tracing::info!("detector announced termination");
                        self.fault();
                    }
                    ProcessSignal::Diagnostic => {}
                }
            }
            ProcessEvent::Stderr(line) => {
                tracing::debug!(line = %line, "detector stderr");
            }
        }
    }

    fn on_process_exited(&mut self) {
        self.console = None;
        if let Some(mut process) = self.process.take() {
            match process.try_wait() {
                Ok(Some(status)) => tracing::warn!(%status, "detector exited"),
                _ => tracing::warn!("detector exited"),
            }
        }
        self.fault();
    }

    /// Idempotent: a previously open outbound end is closed before reopening,
    /// so a stale writer from before a detector restart never lingers.
    fn open_pipes(&mut self) {
        self.transition(ReadinessState::OpeningPipes);

        match self
            .pipes
            .open(&self.config.inbound_pipe, &self.config.outbound_pipe)
        {
            Ok(()) => {
                self.open_attempts = 0;
                self.retry_at = None;
                self.read_failures = 0;
                tracing::info!(
                    inbound = %self.config.inbound_pipe.display(),
                    outbound = %self.config.outbound_pipe.display(),
                    "detector channel ready"
                );
                self.transition(ReadinessState::Ready);
                self.flush_queue();
            }
            Err(e) => {
                self.open_attempts = self.open_attempts.saturating_add(1);
                if self.open_attempts >= MAX_OPEN_ATTEMPTS {
                    tracing::error!(
                        error = %e,
                        attempts = self.open_attempts,
                        "giving up opening detector pipes"
                    );
                    self.fault();
                } else {
                    tracing::debug!(
                        error = %e,
                        attempt = self.open_attempts,
                        "pipes not ready yet, retrying"
                    );
                    self.retry_at = Some(Instant::now() + OPEN_RETRY_DELAY);
                }
            }
        }
    }

    /// One-shot FIFO drain. On a write failure the command goes back to the
    /// front and the channel faults; the queue survives for the next restart.
    fn flush_queue(&mut self) {
        if !self.state.state().is_ready() {
            return;
        }

        while let Some(command) = self.queue.pop_front() {
            if let Err(e) = self.pipes.write_line(&command) {
                tracing::warn!(%command, error = %e, "command delivery failed, re-queuing");
                self.queue.requeue_front(command);
                self.fault();
                return;
            }
            tracing::trace!(%command, "command delivered");
        }
    }

    fn handle_readable(&mut self) {
        match self.pipes.read_lines() {
            Ok(lines) => {
                self.read_failures = 0;
                for line in lines {
                    self.handle_record(&line);
                }
            }
            Err(PipeError::Closed) => {
                tracing::warn!("inbound pipe closed by detector");
                self.fault();
            }
            Err(e) => {
                self.read_failures = self.read_failures.saturating_add(1);
                tracing::warn!(
                    error = %e,
                    failures = self.read_failures,
                    "inbound pipe read failed"
                );
                if self.read_failures >= MAX_READ_FAILURES {
                    self.fault();
                }
            }
        }
    }

    fn handle_record(&mut self, line: &str) {
        match protocol::parse_record(line) {
            Ok(Some(DetectorRecord::Location(loc))) => {
                tracing::trace!(x = loc.x, angle = loc.angle, mass = loc.mass, "line position");
                self.reading.store(loc.x, Ordering::Relaxed);
            }
            Ok(Some(DetectorRecord::Calibration(window))) => {
                let command = window.to_command(self.config.tolerance_factor);
                // A broken outbound end shows up again on the inbound side as
                // a hangup, which is where the channel faults.
                if let Err(e) = self.pipes.write_line(&command) {
                    tracing::warn!(%command, error = %e, "calibration echo failed");
                }
            }
            Ok(None) => tracing::debug!(record = %line, "ignoring unknown record"),
            Err(e) => tracing::warn!(error = %e, "dropping malformed record"),
        }
    }

    /// Single teardown path for every failure branch: closes both pipes,
    /// clears the in-flight read state and parks the channel in Faulted.
    /// Queued commands are kept for the next successful restart.
    fn fault(&mut self) {
        self.pipes.close();
        self.retry_at = None;
        self.open_attempts = 0;
        self.read_failures = 0;
        if self.state.state() != ReadinessState::Faulted {
            self.transition(ReadinessState::Faulted);
        }
    }

    /// Teardown in reverse order of acquisition: reads are disabled and the
    /// pipes closed before the process is told to terminate.
    async fn shutdown(&mut self) {
        tracing::debug!(stats = ?self.state.stats(), "supervisor shutting down");
        self.pipes.close();
        self.console = None;
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.graceful_terminate(DEFAULT_TERMINATE_TIMEOUT).await {
                tracing::warn!(error = %e, "detector did not terminate cleanly");
            }
        }
        if self.state.state() != ReadinessState::Faulted {
            self.transition(ReadinessState::Faulted);
        }
    }
}

async fn recv_console(
    console: Option<&mut mpsc::Receiver<ProcessEvent>>,
) -> Option<ProcessEvent> {
    match console {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
