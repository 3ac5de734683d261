// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation of undelivered messages after job completion.
//!
//! Finished jobs wait here until every ledger entry has reached a
//! subscriber at least once. Each pass redelivers what is still marked
//! undelivered, compacts the ledger, and deletes the job directory once
//! nothing undelivered remains. Entries are retried indefinitely; none
//! is ever dropped for lack of a subscriber.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use courier_core::{Job, JobPaths};

use crate::broadcast::Broadcaster;
use crate::ledger::{self, LedgerError};
use crate::lifecycle::Lifecycle;

struct PendingJob {
    paths: JobPaths,
    /// Guards against a second concurrent pass over the same job.
    reconciling: bool,
}

/// Owns jobs whose process has finished, until full delivery.
pub struct Cleaner {
    broadcaster: Arc<Broadcaster>,
    pending: Mutex<HashMap<String, PendingJob>>,
    count: AtomicU32,
    interval: Duration,
}

impl Cleaner {
    pub fn new(broadcaster: Arc<Broadcaster>, interval: Duration) -> Self {
        Self {
            broadcaster,
            pending: Mutex::new(HashMap::new()),
            count: AtomicU32::new(0),
            interval,
        }
    }

    /// Jobs awaiting reconciliation.
    pub fn pending_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Accept a finished job. Called once per job, after its ledger has
    /// been closed. The PID file is no longer meaningful once the
    /// process has exited.
    pub fn enqueue(&self, job: &Job) {
        info!(job_id = %job.id, "job queued for reconciliation");
        if let Err(e) = fs::remove_file(&job.paths.pid) {
            debug!(job_id = %job.id, error = %e, "pid file not removed");
        }
        let mut pending = self.pending.lock();
        let inserted = pending
            .insert(job.id.clone(), PendingJob { paths: job.paths.clone(), reconciling: false })
            .is_none();
        if inserted {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Background loop: runs for the life of the process.
    pub async fn run(self: Arc<Self>, lifecycle: Arc<Lifecycle>) {
        loop {
            if !self.broadcaster.has_subscribers().await {
                let pending = self.pending_count();
                if pending != 0 {
                    debug!(pending, "jobs await reconciliation, but no subscriber is connected");
                }
                tokio::time::sleep(self.interval).await;
                continue;
            }

            let batch = self.claim_idle();
            if batch.is_empty() {
                tokio::time::sleep(self.interval).await;
                continue;
            }

            for (job_id, paths) in batch {
                match self.reconcile(&job_id, &paths).await {
                    Ok(true) => {
                        self.pending.lock().remove(&job_id);
                        self.count.fetch_sub(1, Ordering::SeqCst);
                        lifecycle.note_progress();
                        info!(job_id = %job_id, "job fully delivered and removed");
                    }
                    Ok(false) => {
                        debug!(job_id = %job_id, "undelivered entries remain");
                        self.release(&job_id);
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "reconciliation pass failed");
                        self.release(&job_id);
                    }
                }
            }
        }
    }

    /// Mark every idle job in-progress and return it. At most one pass
    /// runs per job at any time.
    fn claim_idle(&self) -> Vec<(String, JobPaths)> {
        let mut pending = self.pending.lock();
        pending
            .iter_mut()
            .filter(|(_, job)| !job.reconciling)
            .map(|(id, job)| {
                job.reconciling = true;
                (id.clone(), job.paths.clone())
            })
            .collect()
    }

    /// Return a job to the idle state so a later pass retries it.
    fn release(&self, job_id: &str) {
        if let Some(job) = self.pending.lock().get_mut(job_id) {
            job.reconciling = false;
        }
    }

    /// One reconciliation pass over a job's ledger.
    ///
    /// Redelivers entries still marked undelivered, rewrites the ledger
    /// with the updated delivery flags (original order preserved), and
    /// removes the whole job directory once everything has been
    /// delivered. Returns `true` in that terminal case.
    async fn reconcile(&self, job_id: &str, paths: &JobPaths) -> Result<bool, LedgerError> {
        debug!(job_id = %job_id, "reconciling");
        let mut entries = ledger::read_entries(&paths.ledger)?;

        let mut all_delivered = true;
        for entry in &mut entries {
            if entry.is_delivered() {
                continue;
            }
            if self.broadcaster.deliver(entry).await {
                entry.mark_delivered();
            } else {
                all_delivered = false;
            }
        }

        let tmp = paths.dir.join("messages.tmp");
        ledger::write_entries(&tmp, &entries)?;

        if all_delivered {
            fs::remove_dir_all(&paths.dir).map_err(|e| LedgerError::Io {
                path: paths.dir.clone(),
                source: e,
            })?;
            return Ok(true);
        }

        // Keep the compacted, partially-delivered ledger: promote the
        // temporary file in one atomic step so a crash mid-pass can
        // never lose delivery flags already earned.
        fs::rename(&tmp, &paths.ledger).map_err(|e| LedgerError::Io {
            path: paths.ledger.clone(),
            source: e,
        })?;
        Ok(false)
    }
}

#[cfg(test)]
#[path = "cleaner_tests.rs"]
mod tests;
