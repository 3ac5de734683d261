// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery-tracked message model and its ledger record codec.
//!
//! Ledger record format, one line per message:
//!
//! ```text
//! <id>,<rfc3339 timestamp>,<delivery>,<process>,<text>
//! ```
//!
//! `delivery` is `0` (not delivered) or `1` (delivered); `process` is
//! `0` (succeeded), `1` (running), or `2` (failed). `text` is the final
//! field and takes the remainder of the line, so it may itself contain
//! commas. Line feeds cannot occur in `text`: output is ingested
//! line-by-line and synthetic payloads are single-line JSON.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;

crate::define_id! {
    /// Unique identifier for one delivery-tracked message.
    pub struct MessageId("msg-");
}

/// A ledger record that could not be decoded. Recoverable on the read
/// path: the surrounding pass fails and is retried, the process never
/// aborts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has {found} fields, expected 5")]
    MissingFields { found: usize },

    #[error("invalid timestamp '{0}'")]
    BadTimestamp(String),

    #[error("unknown delivery status '{0}'")]
    BadDeliveryStatus(String),

    #[error("unknown process status '{0}'")]
    BadProcessStatus(String),
}

/// Whether a message has ever reached a subscriber. One-directional:
/// `NotDelivered → Delivered`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    NotDelivered,
    Delivered,
}

impl DeliveryStatus {
    pub fn code(self) -> u8 {
        match self {
            DeliveryStatus::NotDelivered => 0,
            DeliveryStatus::Delivered => 1,
        }
    }

    pub fn from_code(s: &str) -> Result<Self, RecordError> {
        match s {
            "0" => Ok(DeliveryStatus::NotDelivered),
            "1" => Ok(DeliveryStatus::Delivered),
            other => Err(RecordError::BadDeliveryStatus(other.to_string())),
        }
    }
}

/// Why a message was emitted: ordinary output from a running process, or
/// the terminal success/failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Succeeded,
    Running,
    Failed,
}

impl ProcessStatus {
    pub fn code(self) -> u8 {
        match self {
            ProcessStatus::Succeeded => 0,
            ProcessStatus::Running => 1,
            ProcessStatus::Failed => 2,
        }
    }

    pub fn from_code(s: &str) -> Result<Self, RecordError> {
        match s {
            "0" => Ok(ProcessStatus::Succeeded),
            "1" => Ok(ProcessStatus::Running),
            "2" => Ok(ProcessStatus::Failed),
            other => Err(RecordError::BadProcessStatus(other.to_string())),
        }
    }
}

crate::simple_display! {
    ProcessStatus {
        Succeeded => "succeeded",
        Running => "running",
        Failed => "failed",
    }
}

/// One unit of job output or lifecycle signal, individually delivery-tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub delivery: DeliveryStatus,
    pub process: ProcessStatus,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(text: impl Into<String>, process: ProcessStatus, clock: &impl Clock) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            delivery: DeliveryStatus::NotDelivered,
            process,
            // Second precision, same as the ledger record format, so a
            // message equals its own ledger round-trip.
            timestamp: clock.utc_now().trunc_subsecs(0),
        }
    }

    pub fn mark_delivered(&mut self) {
        self.delivery = DeliveryStatus::Delivered;
    }

    pub fn is_delivered(&self) -> bool {
        self.delivery == DeliveryStatus::Delivered
    }

    /// Encode as one ledger line (without the trailing newline).
    pub fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.delivery.code(),
            self.process.code(),
            self.text
        )
    }

    /// Decode one ledger line.
    pub fn from_record(line: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.splitn(5, ',').collect();
        if fields.len() != 5 {
            return Err(RecordError::MissingFields { found: fields.len() });
        }
        let timestamp = DateTime::parse_from_rfc3339(fields[1])
            .map_err(|_| RecordError::BadTimestamp(fields[1].to_string()))?
            .with_timezone(&Utc);
        Ok(Self {
            id: MessageId::from_string(fields[0]),
            timestamp,
            delivery: DeliveryStatus::from_code(fields[2])?,
            process: ProcessStatus::from_code(fields[3])?,
            text: fields[4].to_string(),
        })
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
