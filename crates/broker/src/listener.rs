// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections on a Unix socket (and optionally TCP) and serves
//! requests without blocking the rest of the broker. A connection that
//! issues `Subscribe` keeps its request loop but hands a shared write
//! half to the broadcaster, so broadcast frames and responses interleave
//! as whole frames on the same stream.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use courier_core::{Job, Submission, SystemClock, PID_FILE_NAME};
use courier_wire::{
    decode, encode, read_message, read_request, write_message, JobEntry, ProtocolError, Request,
    Response,
};

use crate::broadcast::{Broadcaster, FrameWriter, SubscriberId};
use crate::cleaner::Cleaner;
use crate::dispatch::dispatch;
use crate::env;
use crate::ledger::Ledger;
use crate::lifecycle::Lifecycle;
use crate::runner::Runner;

/// Shared broker context for all request handlers.
pub struct ListenCtx {
    pub lifecycle: Arc<Lifecycle>,
    pub runner: Arc<Runner>,
    pub cleaner: Arc<Cleaner>,
    pub broadcaster: Arc<Broadcaster>,
    /// Invocation prefix for every job's external command.
    pub command_path: Vec<String>,
    pub jobs_dir: PathBuf,
    /// Auth token for TCP connections (from `COURIER_AUTH_TOKEN`).
    /// When set, TCP clients must provide this token in the Hello handshake.
    pub auth_token: Option<String>,
    pub clock: SystemClock,
}

/// Listener task for accepting socket connections.
pub struct Listener {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx>,
}

/// Source of a connection (for auth decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionSource {
    /// Local Unix socket — trusted, no auth required.
    Unix,
    /// Remote TCP — requires auth token in the Hello handshake.
    Tcp,
}

impl Listener {
    /// Create a new listener with Unix socket only.
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, tcp: None, ctx }
    }

    /// Create a new listener with both Unix socket and TCP.
    pub fn with_tcp(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, tcp: Some(tcp), ctx }
    }

    /// Run the accept loop, spawning a task for each connection.
    pub async fn run(mut self) {
        match self.tcp.take() {
            Some(tcp) => self.run_dual(tcp).await,
            None => self.run_unix_only().await,
        }
    }

    async fn run_unix_only(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) =
                            handle_connection(reader, writer, ConnectionSource::Unix, &ctx).await
                        {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("Unix accept error: {}", e),
            }
        }
    }

    async fn run_dual(self, tcp: TcpListener) {
        loop {
            tokio::select! {
                result = self.unix.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = handle_connection(reader, writer, ConnectionSource::Unix, &ctx).await {
                                    log_connection_error(e);
                                }
                            });
                        }
                        Err(e) => error!("Unix accept error: {}", e),
                    }
                }
                result = tcp.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("TCP connection from {}", addr);
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = handle_connection(reader, writer, ConnectionSource::Tcp, &ctx).await {
                                    log_connection_error(e);
                                }
                            });
                        }
                        Err(e) => error!("TCP accept error: {}", e),
                    }
                }
            }
        }
    }
}

fn log_connection_error(e: ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => warn!("connection timeout"),
        _ => error!("connection error: {}", e),
    }
}

/// Handle a single client connection until it closes.
///
/// Generic over reader/writer types so it works with both Unix and TCP
/// streams.
async fn handle_connection<R, W>(
    mut reader: R,
    writer: W,
    source: ConnectionSource,
    ctx: &Arc<ListenCtx>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: FrameWriter = Arc::new(Mutex::new(Box::new(writer)));

    // The first request must arrive promptly; after that the connection
    // may idle indefinitely (a subscriber just listens).
    let first = read_request(&mut reader, env::ipc_timeout()).await?;

    // TCP connections must authenticate via Hello as the first request.
    if source == ConnectionSource::Tcp {
        let Request::Hello { ref token, .. } = first else {
            let response =
                Response::Error { message: "TCP connections must start with Hello".to_string() };
            write_frame(&writer, &response).await?;
            return Ok(());
        };
        if let Some(ref expected) = ctx.auth_token {
            if token.as_deref() != Some(expected.as_str()) {
                let response = Response::Error { message: "unauthorized".to_string() };
                write_frame(&writer, &response).await?;
                return Ok(());
            }
        }
    }

    let mut subscriber: Option<SubscriberId> = None;
    let result = serve(first, &mut reader, &writer, &mut subscriber, ctx).await;

    if let Some(id) = subscriber {
        ctx.broadcaster.remove_subscriber(id).await;
    }
    result
}

/// Request loop for one connection.
async fn serve<R>(
    first: Request,
    reader: &mut R,
    writer: &FrameWriter,
    subscriber: &mut Option<SubscriberId>,
    ctx: &Arc<ListenCtx>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut request = Some(first);
    loop {
        let req = match request.take() {
            Some(req) => req,
            None => match read_message(reader).await {
                Ok(payload) => match decode::<Request>(&payload) {
                    Ok(req) => req,
                    Err(e) => {
                        // Malformed frame: report it and keep the
                        // connection (a subscriber may be attached).
                        let response = Response::Error { message: e.to_string() };
                        write_frame(writer, &response).await?;
                        continue;
                    }
                },
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        debug!(request = ?req, "received request");
        // Subscribe upgrades the connection: acknowledge first, then
        // register, so the ack always precedes the first Delivery frame.
        if matches!(req, Request::Subscribe) {
            write_frame(writer, &Response::Subscribed).await?;
            if subscriber.is_none() {
                let id = ctx.broadcaster.add_subscriber(Arc::clone(writer)).await;
                *subscriber = Some(id);
                info!("subscriber registered");
            }
            continue;
        }
        let response = handle_request(req, ctx).await;
        write_frame(writer, &response).await?;
    }
}

/// Write one response frame through the shared writer.
async fn write_frame(writer: &FrameWriter, response: &Response) -> Result<(), ProtocolError> {
    let payload = encode(response)?;
    let mut guard = writer.lock().await;
    write_message(&mut *guard, &payload).await
}

/// Handle a single request and return a response.
async fn handle_request(request: Request, ctx: &Arc<ListenCtx>) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { .. } => {
            Response::Hello { version: env!("CARGO_PKG_VERSION").to_string() }
        }

        Request::Submit { submission } => submit(ctx, submission).await,

        // Subscribe is handled in the request loop (connection upgrade).
        Request::Subscribe => Response::Subscribed,

        Request::Cancel { job_id } => {
            if ctx.runner.cancel(&job_id) {
                Response::Ok
            } else {
                Response::Error { message: format!("job '{job_id}' is not running") }
            }
        }

        Request::Status => status(ctx),

        Request::Shutdown => {
            ctx.lifecycle.begin_drain();
            Response::ShuttingDown
        }
    }
}

/// Admit one submission: validate, open its ledger, start the process,
/// and wire its output into the broadcaster and ledger.
async fn submit(ctx: &Arc<ListenCtx>, submission: Submission) -> Response {
    let job = match Job::new(submission, &ctx.command_path, &ctx.jobs_dir, &ctx.clock) {
        Ok(job) => job,
        Err(e) => return Response::Error { message: e.to_string() },
    };

    let paths = job.paths.clone();
    let existed = paths.dir.exists();
    let ledger = match Ledger::open(&paths) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(job_id = %job.id, error = %e, "ledger could not be opened");
            return Response::Error { message: e.to_string() };
        }
    };

    let job_id = job.id.clone();
    match ctx.runner.admit(job) {
        Ok(handle) => {
            info!(job_id = %job_id, "job admitted");
            tokio::spawn(dispatch(
                handle,
                ledger,
                Arc::clone(&ctx.broadcaster),
                Arc::clone(&ctx.cleaner),
            ));
            Response::Accepted { job_id }
        }
        Err(e) => {
            ledger.close();
            if !existed {
                // Nothing durable was produced for this job.
                let _ = fs::remove_dir_all(&paths.dir);
            }
            Response::Error { message: e.to_string() }
        }
    }
}

fn status(ctx: &Arc<ListenCtx>) -> Response {
    Response::Status {
        state: ctx.lifecycle.state().to_string(),
        jobs: scan_jobs(&ctx.jobs_dir),
        pending_reconcile: ctx.cleaner.pending_count(),
        jobs_running: ctx.runner.running_count(),
        jobs_total: ctx.runner.total_count(),
    }
}

/// Enumerate job directories under the jobs root, with PID file contents
/// where present.
pub(crate) fn scan_jobs(jobs_dir: &Path) -> Vec<JobEntry> {
    let mut jobs = Vec::new();
    let Ok(read_dir) = fs::read_dir(jobs_dir) else {
        return jobs;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let job_id = entry.file_name().to_string_lossy().to_string();
        let pid = fs::read_to_string(path.join(PID_FILE_NAME))
            .ok()
            .map(|s| s.trim().to_string());
        jobs.push(JobEntry { job_id, pid });
    }
    jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
    jobs
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
