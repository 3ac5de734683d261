// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use courier_core::Submission;
use serde::{Deserialize, Serialize};

/// Request from a client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello {
        version: String,
        /// Auth token for TCP connections (ignored for Unix socket)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Run an external command as a new job
    Submit {
        #[serde(flatten)]
        submission: Submission,
    },

    /// Upgrade this connection into a message subscriber.
    ///
    /// After the `Subscribed` response, every broadcast message arrives
    /// on this connection as a `Delivery` frame. The connection may keep
    /// submitting requests.
    Subscribe,

    /// Terminate a running job's process
    Cancel { job_id: String },

    /// Get broker status
    Status,

    /// Stop admitting jobs and exit once all work has drained
    Shutdown,
}
