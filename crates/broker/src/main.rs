// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! courierd: the courier broker process.
//!
//! Env-configured; see the `env` module for the full variable list. The
//! minimum is `COURIER_CMD_PATH`, the comma-separated invocation prefix
//! for every job's external command.

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use fs2::FileExt;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use courier_broker::{Broadcaster, Cleaner, Config, Lifecycle, ListenCtx, Listener, Runner};
use courier_core::SystemClock;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!("courierd failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    fs::create_dir_all(&config.jobs_dir)
        .with_context(|| format!("creating {}", config.jobs_dir.display()))?;

    // Exclusive lock: exactly one broker per state directory. Held for
    // the life of the process; released by the OS on exit.
    let mut lock_file = File::create(&config.lock_path)
        .with_context(|| format!("creating {}", config.lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        bail!("another courierd is already running in {}", config.state_dir.display());
    }
    let _ = write!(lock_file, "{}", std::process::id());

    // A stale socket from an unclean shutdown would fail the bind.
    let _ = fs::remove_file(&config.socket_path);
    let unix = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;
    let tcp = match config.tcp_port {
        Some(port) => Some(
            TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("binding TCP port {port}"))?,
        ),
        None => None,
    };

    let lifecycle = Arc::new(Lifecycle::new());
    let broadcaster = Arc::new(Broadcaster::new());
    let cleaner = Arc::new(Cleaner::new(Arc::clone(&broadcaster), config.clean_interval));
    let runner = Arc::new(Runner::new(config.max_in_flight, Arc::clone(&lifecycle)));

    tokio::spawn(Arc::clone(&cleaner).run(Arc::clone(&lifecycle)));

    // SIGINT/SIGTERM start the drain; the process exits once every job
    // has finished and reconciled away.
    let drain = Arc::clone(&lifecycle);
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        drain.begin_drain();
    });

    let ctx = Arc::new(ListenCtx {
        lifecycle: Arc::clone(&lifecycle),
        runner: Arc::clone(&runner),
        cleaner: Arc::clone(&cleaner),
        broadcaster,
        command_path: config.command_path.clone(),
        jobs_dir: config.jobs_dir.clone(),
        auth_token: config.auth_token.clone(),
        clock: SystemClock,
    });
    let listener = match tcp {
        Some(tcp) => Listener::with_tcp(unix, tcp, Arc::clone(&ctx)),
        None => Listener::new(unix, ctx),
    };
    tokio::spawn(listener.run());

    lifecycle.set_running();
    info!(
        socket = %config.socket_path.display(),
        command_path = ?config.command_path,
        jobs_dir = %config.jobs_dir.display(),
        "courierd ready"
    );

    lifecycle.wait_terminate(&runner, &cleaner).await;
    info!(total = runner.total_count(), "all jobs finished and reconciled, exiting");
    let _ = fs::remove_file(&config.socket_path);
    Ok(())
}
