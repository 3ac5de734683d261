// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! courier-core: data model for the courier job broker

pub mod macros;

pub mod clock;
pub mod id;
pub mod job;
pub mod message;

pub use clock::{Clock, FakeClock, SystemClock};
pub use id::short;
pub use job::{
    Job, JobMetrics, JobPaths, JobStatus, Submission, ValidationError, LEDGER_FILE_NAME,
    PID_FILE_NAME,
};
pub use message::{DeliveryStatus, Message, MessageId, ProcessStatus, RecordError};
