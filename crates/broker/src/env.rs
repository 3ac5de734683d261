// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the broker.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default ceiling on concurrently running jobs. Above roughly this many
/// child processes, per-user OS limits start returning spawn errors, so
/// admission refuses work before the kernel does.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

/// Errors resolving broker configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("COURIER_CMD_PATH must be set to the command invocation prefix")]
    NoCommandPath,

    #[error("cannot determine state directory (set COURIER_STATE_DIR or HOME)")]
    NoStateDir,
}

/// Broker configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/courier)
    pub state_dir: PathBuf,
    /// Directory holding one subdirectory per unreconciled job
    pub jobs_dir: PathBuf,
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Path to the lock/PID file
    pub lock_path: PathBuf,
    /// Invocation prefix for every job's external command
    pub command_path: Vec<String>,
    /// Ceiling on concurrently running jobs
    pub max_in_flight: usize,
    /// Delay between reconciliation passes
    pub clean_interval: Duration,
    /// Optional TCP port, in addition to the Unix socket
    pub tcp_port: Option<u16>,
    /// Auth token required from TCP clients in the Hello handshake
    pub auth_token: Option<String>,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = state_dir()?;
        Ok(Self {
            jobs_dir: state_dir.join("jobs"),
            socket_path: state_dir.join("courierd.sock"),
            lock_path: state_dir.join("courierd.pid"),
            command_path: command_path()?,
            max_in_flight: max_in_flight(),
            clean_interval: clean_interval(),
            tcp_port: tcp_port(),
            auth_token: auth_token(),
            state_dir,
        })
    }
}

/// Resolve state directory: COURIER_STATE_DIR > XDG_STATE_HOME/courier > ~/.local/state/courier
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("COURIER_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("courier"));
    }
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/courier"))
}

/// Invocation prefix, comma-separated: `COURIER_CMD_PATH=/bin/sh,-c`
pub fn command_path() -> Result<Vec<String>, ConfigError> {
    let raw = std::env::var("COURIER_CMD_PATH").map_err(|_| ConfigError::NoCommandPath)?;
    let parts: Vec<String> =
        raw.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return Err(ConfigError::NoCommandPath);
    }
    Ok(parts)
}

/// Admission ceiling override
pub fn max_in_flight() -> usize {
    std::env::var("COURIER_MAX_JOBS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_IN_FLIGHT)
}

/// Delay between reconciliation passes (default 1s)
pub fn clean_interval() -> Duration {
    std::env::var("COURIER_CLEAN_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
}

/// TCP port for remote connections. When set, the broker listens on this
/// port in addition to the Unix socket.
pub fn tcp_port() -> Option<u16> {
    std::env::var("COURIER_TCP_PORT").ok().and_then(|s| s.parse::<u16>().ok())
}

/// Auth token for TCP connections. Validated in the Hello handshake.
pub fn auth_token() -> Option<String> {
    std::env::var("COURIER_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Default IPC timeout for the first request on a connection
pub fn ipc_timeout() -> Duration {
    std::env::var("COURIER_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
