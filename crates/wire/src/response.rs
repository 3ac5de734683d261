// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use courier_core::Message;
use serde::{Deserialize, Serialize};

/// One known job in a `Status` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    pub job_id: String,
    /// Contents of the PID file, when the process has started and the
    /// job has not yet been reconciled away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
}

/// Response from the broker to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Health check response
    Pong,

    /// Version handshake response
    Hello { version: String },

    /// Job was admitted and its process is being started
    Accepted { job_id: String },

    /// This connection now receives `Delivery` frames
    Subscribed,

    /// One broadcast message
    Delivery { message: Message },

    /// Broker status
    Status {
        state: String,
        jobs: Vec<JobEntry>,
        pending_reconcile: u32,
        jobs_running: u32,
        jobs_total: u32,
    },

    /// Broker is draining and will exit once all work has finished
    ShuttingDown,

    /// Error response
    Error { message: String },
}
