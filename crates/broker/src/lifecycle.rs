// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker-wide lifecycle: admission gating and drain-to-exit.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use crate::cleaner::Cleaner;
use crate::runner::Runner;

/// Process-wide state. One-way: `Starting → Running → Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
}

courier_core::simple_display! {
    LifecycleState {
        Starting => "starting",
        Running => "running",
        Draining => "draining",
    }
}

/// Gates new-job admission and decides when the process may exit.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    progress: Notify,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { state: Mutex::new(LifecycleState::Starting), progress: Notify::new() }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Startup finished; begin accepting jobs.
    pub fn set_running(&self) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Starting {
            *state = LifecycleState::Running;
        }
    }

    /// Stop admitting jobs; existing work runs to completion.
    pub fn begin_drain(&self) {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Draining {
                return;
            }
            *state = LifecycleState::Draining;
        }
        info!("draining: no new jobs will be admitted");
        self.progress.notify_waiters();
    }

    pub fn is_draining(&self) -> bool {
        self.state() == LifecycleState::Draining
    }

    pub fn can_admit(&self) -> bool {
        !self.is_draining()
    }

    /// Wake anything waiting on [`wait_terminate`](Self::wait_terminate).
    /// Called on every job completion and every job reconciled away.
    pub fn note_progress(&self) {
        self.progress.notify_waiters();
    }

    /// True once draining and all work (running jobs and pending
    /// reconciliations) has finished.
    pub fn should_terminate(&self, runner: &Runner, cleaner: &Cleaner) -> bool {
        self.is_draining() && runner.running_count() == 0 && cleaner.pending_count() == 0
    }

    /// Resolve once [`should_terminate`](Self::should_terminate) holds.
    /// Event-driven: re-checks on every progress notification rather
    /// than polling.
    pub async fn wait_terminate(&self, runner: &Runner, cleaner: &Cleaner) {
        loop {
            let notified = self.progress.notified();
            if self.should_terminate(runner, cleaner) {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
