//! Aggregate batch state, mutated only by the batch coordination task.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::jobs::{Job, JobStatus};

/// Overall progress snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    /// floor(completed / total * 100)
    pub percent: u8,
    pub elapsed_secs: u64,
    /// Unknown until the first job completes
    pub remaining_secs: Option<u64>,
}

impl BatchProgress {
    pub fn compute(completed: usize, total: usize, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (completed.min(total) * 100 / total) as u8
        };

        let remaining = if completed == 0 {
            None
        } else {
            let left = total.saturating_sub(completed) as f64;
            Some(elapsed.mul_f64(left / completed as f64))
        };

        Self {
            completed,
            total,
            percent,
            elapsed_secs: elapsed.as_secs(),
            remaining_secs: remaining.map(|r| r.as_secs()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(self.elapsed_secs)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_secs.map(Duration::from_secs)
    }
}

/// Ordered jobs plus dispatch and completion counters
#[derive(Debug)]
pub struct BatchState {
    jobs: Vec<Job>,
    next_dispatch_index: usize,
    completed_count: usize,
    running: usize,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    start_time: Instant,
}

impl BatchState {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            next_dispatch_index: 0,
            completed_count: 0,
            running: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            start_time: Instant::now(),
        }
    }

    pub fn job(&self, index: usize) -> &Job {
        &self.jobs[index]
    }

    pub fn index_of(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == job_id)
    }

    pub fn total_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn restart_clock(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count == self.jobs.len()
    }

    /// Marks the next queued job running and returns its index.
    pub fn dispatch_next(&mut self) -> Option<usize> {
        while self.next_dispatch_index < self.jobs.len() {
            let index = self.next_dispatch_index;
            self.next_dispatch_index += 1;

            if self.jobs[index].status == JobStatus::Queued {
                self.jobs[index].mark_running();
                self.running += 1;
                return Some(index);
            }
        }
        None
    }

    pub fn record_progress(&mut self, index: usize, progress: u8) -> u8 {
        let job = &mut self.jobs[index];
        job.record_progress(progress);
        job.progress
    }

    /// Moves a job to a terminal status, updating counters.
    ///
    /// Returns false if the job had already finished.
    pub fn finish(&mut self, index: usize, status: JobStatus) -> bool {
        let job = &mut self.jobs[index];
        let was_running = job.is_running();
        if !job.finish(status) {
            return false;
        }

        if was_running {
            self.running -= 1;
        }
        self.completed_count += 1;
        match status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Queued | JobStatus::Running => {}
        }
        true
    }

    /// Cancels every job that was never dispatched; returns their indices.
    pub fn cancel_queued(&mut self) -> Vec<usize> {
        let queued: Vec<usize> = (self.next_dispatch_index..self.jobs.len())
            .filter(|&i| self.jobs[i].status == JobStatus::Queued)
            .collect();
        for &index in &queued {
            self.finish(index, JobStatus::Cancelled);
        }
        self.next_dispatch_index = self.jobs.len();
        queued
    }

    /// Indices of jobs currently running
    pub fn running_indices(&self) -> Vec<usize> {
        (0..self.jobs.len())
            .filter(|&i| self.jobs[i].is_running())
            .collect()
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress::compute(self.completed_count, self.jobs.len(), self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn state(count: usize) -> BatchState {
        BatchState::new(
            (0..count)
                .map(|i| Job::new(PathBuf::from(format!("{i}.png")), PathBuf::from(format!("{i}_out.jpg"))))
                .collect(),
        )
    }

    #[test]
    fn test_progress_math() {
        let p = BatchProgress::compute(0, 4, Duration::from_secs(10));
        assert_eq!(p.percent, 0);
        assert_eq!(p.remaining(), None);

        let p = BatchProgress::compute(1, 3, Duration::from_secs(30));
        assert_eq!(p.percent, 33);
        assert_eq!(p.remaining(), Some(Duration::from_secs(60)));
        assert_eq!(p.elapsed(), Duration::from_secs(30));

        let p = BatchProgress::compute(3, 3, Duration::from_secs(90));
        assert_eq!(p.percent, 100);
        assert_eq!(p.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let state = state(0);
        assert!(state.is_complete());
        assert_eq!(state.progress().percent, 100);
    }

    #[test]
    fn test_dispatch_in_order() {
        let mut state = state(3);
        assert_eq!(state.dispatch_next(), Some(0));
        assert_eq!(state.dispatch_next(), Some(1));
        assert_eq!(state.running_count(), 2);
        assert!(state.job(0).is_running());
        assert_eq!(state.dispatch_next(), Some(2));
        assert_eq!(state.dispatch_next(), None);
    }

    #[test]
    fn test_finish_counts_each_job_once() {
        let mut state = state(2);
        state.dispatch_next();
        assert!(state.finish(0, JobStatus::Failed));
        assert!(!state.finish(0, JobStatus::Succeeded));
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.failed(), 1);
        assert_eq!(state.succeeded(), 0);
        assert_eq!(state.running_count(), 0);
    }

    #[test]
    fn test_cancel_queued_skips_running() {
        let mut state = state(3);
        state.dispatch_next();

        assert_eq!(state.cancel_queued(), vec![1, 2]);
        assert_eq!(state.cancelled(), 2);
        assert_eq!(state.completed_count(), 2);
        assert_eq!(state.dispatch_next(), None);
        assert_eq!(state.running_indices(), vec![0]);
        assert!(!state.is_complete());
    }

    #[test]
    fn test_job_progress_is_monotonic() {
        let mut state = state(1);
        state.dispatch_next();
        assert_eq!(state.record_progress(0, 50), 50);
        assert_eq!(state.record_progress(0, 30), 50);
    }
}
