// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process execution and admission control.
//!
//! One supervision task per admitted job spawns the external command in
//! its own process group, drains stdout and stderr line by line into the
//! message stream, and finishes with a metrics message plus exactly one
//! terminal message. A command that exits non-zero (or never spawns) is
//! not a broker fault: it surfaces as job status and a `Failed`
//! message, nothing more.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{Clock, Job, JobStatus, Message, ProcessStatus, SystemClock};

use crate::lifecycle::Lifecycle;

/// Terminal message text for a clean exit.
pub const DONE_TEXT: &str = "Cmd done";

/// Admission-time refusal. No job state is created.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmitError {
    /// At the in-flight ceiling; the caller may retry later.
    #[error("job limit reached, try again later")]
    AtCapacity,

    /// Broker is draining; no new work is accepted.
    #[error("broker is draining, not accepting jobs")]
    Draining,

    /// The job is not in the expected lifecycle state; a usage bug.
    #[error("job '{job_id}' is not in waiting state")]
    InvalidState { job_id: String },
}

/// Live outputs of an admitted job.
pub struct JobHandle {
    pub job_id: String,
    /// Messages in production order; the channel closes after the
    /// terminal message.
    pub messages: mpsc::UnboundedReceiver<Message>,
    /// Fires once, as soon as the process has started.
    pub pid: oneshot::Receiver<u32>,
    /// Resolves with the finished job once the process has exited and
    /// the message stream has closed.
    pub done: oneshot::Receiver<Job>,
    /// Requests termination of the job's process group.
    pub cancel: CancellationToken,
}

/// Admits jobs against a global in-flight ceiling and supervises their
/// processes.
pub struct Runner {
    semaphore: Arc<Semaphore>,
    running: AtomicU32,
    total: AtomicU32,
    lifecycle: Arc<Lifecycle>,
    cancels: parking_lot::Mutex<HashMap<String, CancellationToken>>,
    clock: SystemClock,
}

impl Runner {
    pub fn new(max_in_flight: usize, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            running: AtomicU32::new(0),
            total: AtomicU32::new(0),
            lifecycle,
            cancels: parking_lot::Mutex::new(HashMap::new()),
            clock: SystemClock,
        }
    }

    /// Jobs currently running.
    pub fn running_count(&self) -> u32 {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs ever admitted.
    pub fn total_count(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    /// Request termination of a running job. Returns false when no such
    /// job is running.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancels.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Admit a job and start its supervision task.
    ///
    /// Fails without creating any state when the broker is draining, the
    /// in-flight ceiling is reached, or the job is not `Waiting`.
    pub fn admit(self: &Arc<Self>, mut job: Job) -> Result<JobHandle, AdmitError> {
        if job.status != JobStatus::Waiting {
            return Err(AdmitError::InvalidState { job_id: job.id.clone() });
        }
        if !self.lifecycle.can_admit() {
            return Err(AdmitError::Draining);
        }
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(AdmitError::AtCapacity),
        };

        self.total.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        job.status = JobStatus::Running;

        let cancel = CancellationToken::new();
        self.cancels.lock().insert(job.id.clone(), cancel.clone());

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (pid_tx, pid_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let runner = Arc::clone(self);
        let job_id = job.id.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let job = runner.execute(job, msg_tx, pid_tx, token).await;
            runner.cancels.lock().remove(&job.id);
            runner.running.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            runner.lifecycle.note_progress();
            let _ = done_tx.send(job);
        });

        Ok(JobHandle { job_id, messages: msg_rx, pid: pid_rx, done: done_rx, cancel })
    }

    /// Run one job's process to completion, streaming its output.
    async fn execute(
        &self,
        mut job: Job,
        tx: UnboundedSender<Message>,
        pid_tx: oneshot::Sender<u32>,
        cancel: CancellationToken,
    ) -> Job {
        let argv = job.invocation();
        job.metrics.start_time = Some(self.clock.utc_now());

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so the job can be signalled without
            // touching the broker.
            .process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "process failed to spawn");
                job.metrics.end_time = Some(self.clock.utc_now());
                self.send_metrics(&job, &tx);
                self.send(&tx, format!("spawn failed: {e}"), ProcessStatus::Failed);
                job.status = JobStatus::Failed;
                return job;
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            debug!(job_id = %job.id, pid, "process started");
            let _ = pid_tx.send(pid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_drain = drain_lines(stdout, tx.clone(), self.clock.clone());
        let err_drain = drain_lines(stderr, tx.clone(), self.clock.clone());

        let mut cancelled = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!(job_id = %job.id, "cancellation requested, signalling process group");
                    if let Some(pid) = pid {
                        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                            warn!(job_id = %job.id, error = %e, "failed to signal process group");
                        }
                    }
                }
            }
        };
        job.metrics.end_time = Some(self.clock.utc_now());

        // Both drains must reach EOF before anything else is emitted, so
        // no buffered output can land after the terminal message.
        let _ = out_drain.await;
        let _ = err_drain.await;

        self.send_metrics(&job, &tx);

        match status {
            Ok(status) if status.success() => {
                job.status = JobStatus::Succeeded;
                self.send(&tx, DONE_TEXT, ProcessStatus::Succeeded);
            }
            Ok(status) => {
                job.status = JobStatus::Failed;
                self.send(&tx, format!("command failed: {status}"), ProcessStatus::Failed);
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                self.send(&tx, format!("wait failed: {e}"), ProcessStatus::Failed);
            }
        }
        info!(job_id = %job.id, status = %job.status, "job finished");
        job
    }

    /// One message carrying the serialized start/end timestamps.
    fn send_metrics(&self, job: &Job, tx: &UnboundedSender<Message>) {
        match serde_json::to_string(&job.metrics) {
            Ok(text) => self.send(tx, text, ProcessStatus::Running),
            Err(e) => warn!(job_id = %job.id, error = %e, "metrics did not serialize"),
        }
    }

    fn send(&self, tx: &UnboundedSender<Message>, text: impl Into<String>, process: ProcessStatus) {
        let _ = tx.send(Message::new(text, process, &self.clock));
    }
}

/// Drain one output pipe line by line into the message stream.
fn drain_lines<R>(
    reader: Option<R>,
    tx: UnboundedSender<Message>,
    clock: SystemClock,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(%line, "process output");
                    if tx.send(Message::new(line, ProcessStatus::Running, &clock)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "output drain failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
