// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job model: submission record, lifecycle status, paths, and metrics.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;

/// File holding the per-job message ledger, inside the job directory.
pub const LEDGER_FILE_NAME: &str = "messages.log";
/// File holding the OS process id, inside the job directory.
pub const PID_FILE_NAME: &str = "pid";

/// A malformed job-run request, rejected before any [`Job`] is constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("jobId must not be blank")]
    BlankJobId,

    #[error("command must not be blank")]
    BlankCommand,

    /// Job ids become directory names, so path separators are refused.
    #[error("jobId must not contain '/': {0}")]
    JobIdWithSeparator(String),
}

/// A parsed job-run request.
///
/// `parameters` is free-form; by convention a JSON-encoded object handed
/// through to the external command untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: String,
    pub command: String,
    #[serde(default)]
    pub parameters: String,
}

impl Submission {
    pub fn new(
        job_id: impl Into<String>,
        command: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self { job_id: job_id.into(), command: command.into(), parameters: parameters.into() }
    }

    /// Check required fields before a job is admitted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_id.trim().is_empty() {
            return Err(ValidationError::BlankJobId);
        }
        if self.job_id.contains('/') {
            return Err(ValidationError::JobIdWithSeparator(self.job_id.clone()));
        }
        if self.command.trim().is_empty() {
            return Err(ValidationError::BlankCommand);
        }
        Ok(())
    }
}

/// Job lifecycle status. Transitions are one-way:
/// `Waiting → Running → {Succeeded | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

crate::simple_display! {
    JobStatus {
        Waiting => "waiting",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

/// On-disk layout for one job: a directory named by the job id, holding
/// the message ledger and the PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub dir: PathBuf,
    pub ledger: PathBuf,
    pub pid: PathBuf,
}

impl JobPaths {
    pub fn new(root: &Path, job_id: &str) -> Self {
        let dir = root.join(job_id);
        Self {
            ledger: dir.join(LEDGER_FILE_NAME),
            pid: dir.join(PID_FILE_NAME),
            dir,
        }
    }
}

/// Timing metrics for one job run. Each field is set at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub init_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// One request to run an external command, tracked from admission through
/// terminal status and final reconciliation.
#[derive(Debug, Clone)]
pub struct Job {
    /// Caller-supplied opaque identifier, unique per submission.
    pub id: String,
    /// Process-wide invocation prefix (binary + fixed leading args).
    pub command_path: Vec<String>,
    pub command: String,
    pub parameters: String,
    pub status: JobStatus,
    pub paths: JobPaths,
    pub metrics: JobMetrics,
}

impl Job {
    /// Validate a submission and construct a `Waiting` job under `root`.
    pub fn new(
        submission: Submission,
        command_path: &[String],
        root: &Path,
        clock: &impl Clock,
    ) -> Result<Self, ValidationError> {
        submission.validate()?;
        let paths = JobPaths::new(root, &submission.job_id);
        Ok(Self {
            id: submission.job_id,
            command_path: command_path.to_vec(),
            command: submission.command,
            parameters: submission.parameters,
            status: JobStatus::Waiting,
            paths,
            metrics: JobMetrics {
                init_time: clock.utc_now(),
                start_time: None,
                end_time: None,
            },
        })
    }

    /// Full argv for the external process:
    /// `<command_path...> <command> --parameters <parameters> --jobId <id>`.
    pub fn invocation(&self) -> Vec<String> {
        let mut argv = self.command_path.clone();
        argv.push(self.command.clone());
        argv.push("--parameters".to_string());
        argv.push(self.parameters.clone());
        argv.push("--jobId".to_string());
        argv.push(self.id.clone());
        argv
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
