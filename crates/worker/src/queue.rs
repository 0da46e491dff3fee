//! Pending-job queue and session state.
//!
//! Both are owned by the dispatcher's control loop and never shared, so
//! neither needs locking.

use std::collections::VecDeque;

use artgen_core::job::JobDescriptor;
use serde::Serialize;
use uuid::Uuid;

/// Strict FIFO of jobs waiting for dispatch.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    jobs: VecDeque<JobDescriptor>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_all(&mut self, jobs: impl IntoIterator<Item = JobDescriptor>) {
        self.jobs.extend(jobs);
    }

    pub fn dequeue(&mut self) -> Option<JobDescriptor> {
        self.jobs.pop_front()
    }

    pub fn peek(&self) -> Option<&JobDescriptor> {
        self.jobs.front()
    }

    /// Replace every pending job with `jobs`. Returns how many were dropped.
    pub fn replace_all(&mut self, jobs: impl IntoIterator<Item = JobDescriptor>) -> usize {
        let dropped = self.jobs.len();
        self.jobs = jobs.into_iter().collect();
        dropped
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Operator-visible state of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub paused: bool,
    /// Once set, the loop exits as soon as nothing is in flight.
    pub terminate_requested: bool,
    pub jobs_completed: u64,
}

/// Point-in-time view of the session, for status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub paused: bool,
    pub terminate_requested: bool,
    pub jobs_completed: u64,
    pub pending: usize,
    pub in_flight: Option<Uuid>,
}

impl SessionState {
    /// Flip the pause flag. Returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn request_pause(&mut self) {
        self.paused = true;
    }

    pub fn request_resume(&mut self) {
        self.paused = false;
    }

    /// Request termination. Only accepted while paused; returns whether it
    /// was.
    pub fn request_terminate(&mut self) -> bool {
        if self.paused {
            self.terminate_requested = true;
        }
        self.paused
    }

    pub fn record_completion(&mut self) {
        self.jobs_completed += 1;
    }

    pub fn snapshot(&self, pending: usize, in_flight: Option<Uuid>) -> SessionSnapshot {
        SessionSnapshot {
            paused: self.paused,
            terminate_requested: self.terminate_requested,
            jobs_completed: self.jobs_completed,
            pending,
            in_flight,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
