//! Control loop: queue, dispatch and operator events.
//!
//! A single task owns the queue and session state. Exactly one job is in
//! flight at a time; it runs on its own Tokio task and reports back over a
//! completion channel. The loop blocks in `select!` on that channel and the
//! control channel, so control events are handled while a job runs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use artgen_core::error::CoreError;
use artgen_core::expander;
use artgen_core::job::JobDescriptor;
use artgen_pipeline::runner::{JobOutcome, JobReport, JobRunner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::control::{ControlEvent, COMMAND_HELP};
use crate::queue::{DispatchQueue, SessionSnapshot, SessionState};

/// Executes one job to completion.
///
/// [`JobRunner`] is the production implementation.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: JobDescriptor) -> impl Future<Output = JobReport> + Send;
}

impl JobExecutor for JobRunner {
    fn execute(&self, job: JobDescriptor) -> impl Future<Output = JobReport> + Send {
        async move { self.run(&job).await }
    }
}

/// Owns the queue for one prompt file and drives it to completion.
pub struct Dispatcher<E: JobExecutor> {
    source: PathBuf,
    executor: Arc<E>,
    queue: DispatchQueue,
    session: SessionState,
    in_flight: Option<Uuid>,
    rng: StdRng,
}

impl<E: JobExecutor> Dispatcher<E> {
    pub fn new(source: impl Into<PathBuf>, executor: Arc<E>) -> Self {
        Self {
            source: source.into(),
            executor,
            queue: DispatchQueue::new(),
            session: SessionState::default(),
            in_flight: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Use `rng` for prefix/suffix choice and seeds.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.queue.len(), self.in_flight)
    }

    fn expand(&mut self) -> Result<Vec<JobDescriptor>, CoreError> {
        expander::expand_source(&self.source, &mut self.rng)
    }

    /// Parse and expand the prompt file into the queue.
    pub fn load(&mut self) -> Result<usize, CoreError> {
        let jobs = self.expand()?;
        let count = jobs.len();
        self.queue.enqueue_all(jobs);
        tracing::info!(source = %self.source.display(), jobs = count, "Prompt file loaded");
        Ok(count)
    }

    /// Run until the queue is drained or termination is requested.
    pub async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<ControlEvent>,
    ) -> SessionSnapshot {
        let (done_tx, mut done_rx) = mpsc::channel::<JobReport>(1);
        let mut control_open = true;

        loop {
            if self.in_flight.is_none() {
                if self.session.terminate_requested {
                    tracing::info!(
                        pending = self.queue.len(),
                        "Terminating at operator request",
                    );
                    break;
                }
                if !self.session.paused {
                    match self.queue.dequeue() {
                        Some(job) => self.dispatch(job, &done_tx),
                        None => {
                            tracing::info!(
                                completed = self.session.jobs_completed,
                                "All work done",
                            );
                            break;
                        }
                    }
                } else if !control_open {
                    tracing::warn!("Control input closed while paused, exiting");
                    break;
                }
            }

            // Control first, so an event that arrived before a completion is
            // applied before the next dispatch decision.
            tokio::select! {
                biased;
                event = control_rx.recv(), if control_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::debug!("Control channel closed");
                        control_open = false;
                    }
                },
                Some(report) = done_rx.recv() => self.on_completed(report),
            }
        }

        self.snapshot()
    }

    fn dispatch(&mut self, job: JobDescriptor, done_tx: &mpsc::Sender<JobReport>) {
        self.in_flight = Some(job.id);
        let start = Instant::now();
        tracing::info!(
            job_id = %job.id,
            backend = %job.backend,
            pending = self.queue.len(),
            "Dispatching job",
        );

        let job_id = job.id;
        let executor = Arc::clone(&self.executor);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            // A panicking job still has to report back, or the loop would
            // wait on it forever.
            let task = tokio::spawn(async move { executor.execute(job).await });
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Job task failed");
                    JobReport {
                        job_id,
                        outcome: JobOutcome::NoOutput,
                        exit_code: None,
                        artifacts: Vec::new(),
                        errors: vec![format!("job task failed: {e}")],
                        elapsed: start.elapsed(),
                    }
                }
            };
            if done_tx.send(report).await.is_err() {
                tracing::warn!("Dispatcher gone before job completion was reported");
            }
        });
    }

    fn on_completed(&mut self, report: JobReport) {
        self.in_flight = None;
        self.session.record_completion();
        tracing::info!(
            job_id = %report.job_id,
            outcome = ?report.outcome,
            exit_code = ?report.exit_code,
            artifacts = report.artifacts.len(),
            completed = self.session.jobs_completed,
            pending = self.queue.len(),
            "Job finished",
        );
        for error in &report.errors {
            tracing::warn!(job_id = %report.job_id, error = %error, "Job reported an error");
        }
    }

    fn handle_event(&mut self, event: ControlEvent) {
        tracing::debug!(event = %event, "Control event");
        match event {
            ControlEvent::TogglePause => {
                if self.session.toggle_pause() {
                    self.log_paused();
                } else {
                    tracing::info!("Resumed");
                }
            }
            ControlEvent::Pause => {
                self.session.request_pause();
                self.log_paused();
            }
            ControlEvent::Resume => {
                self.session.request_resume();
                tracing::info!("Resumed");
            }
            ControlEvent::Reload => self.reload(),
            ControlEvent::Terminate => {
                if self.session.request_terminate() {
                    if self.in_flight.is_some() {
                        tracing::info!("Terminate requested, exiting after the current job");
                    } else {
                        tracing::info!("Terminate requested");
                    }
                } else {
                    tracing::warn!("Terminate is only accepted while paused; pause first");
                }
            }
            ControlEvent::Status => {
                let snapshot = self.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(status) => tracing::info!(status = %status, "Session status"),
                    Err(e) => tracing::warn!(error = %e, "Failed to render session status"),
                }
            }
        }
    }

    fn log_paused(&self) {
        if self.in_flight.is_some() {
            tracing::info!("Paused; the current job will finish. {COMMAND_HELP}");
        } else {
            tracing::info!("Paused. {COMMAND_HELP}");
        }
    }

    /// Re-expand the prompt file. The pending queue is only replaced if the
    /// new expansion succeeds; the in-flight job is never touched.
    fn reload(&mut self) {
        match self.expand() {
            Ok(jobs) => {
                let count = jobs.len();
                let dropped = self.queue.replace_all(jobs);
                tracing::info!(
                    source = %self.source.display(),
                    jobs = count,
                    dropped,
                    "Prompt file reloaded",
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    pending = self.queue.len(),
                    "Reload failed, keeping current queue",
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
