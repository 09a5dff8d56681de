//! Job table
//!
//! Background pipelines get a monotonically increasing id and an entry here
//! holding their command text, status and control handle. Entries stay after
//! completion (status `Done`) until reaped by `jobs`; past
//! [`MAX_FINISHED`] unreaped entries the oldest finished ones are dropped.

use super::signal::{JobControl, Signal, SignalAction};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

pub type JobId = u32;

/// Finished jobs kept for `jobs` to report
pub const MAX_FINISHED: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Paused,
    Done,
}

impl JobStatus {
    /// One-letter state used by `ps`
    pub fn code(&self) -> char {
        match self {
            JobStatus::Running => 'R',
            JobStatus::Paused => 'T',
            JobStatus::Done => 'Z',
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Paused => write!(f, "Paused"),
            JobStatus::Done => write!(f, "Done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("({0}) - No such job")]
    NoSuchJob(JobId),
    #[error("({0}) - Job has already finished")]
    AlreadyDone(JobId),
    #[error("({id}) - Operation not permitted")]
    NotOwner { id: JobId },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub owner: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub started: DateTime<Utc>,
    pub control: JobControl,
}

#[derive(Debug)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    next_id: JobId,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a running job and return its id
    pub fn insert(&mut self, command: &str, owner: &str, control: JobControl) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(
            id,
            Job {
                id,
                command: command.to_string(),
                owner: owner.to_string(),
                status: JobStatus::Running,
                exit_code: None,
                started: Utc::now(),
                control,
            },
        );
        log::debug!("job [{}] started: {}", id, command);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn list(&self) -> Vec<&Job> {
        self.jobs.values().collect()
    }

    /// Jobs that have not finished
    pub fn active(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| j.status != JobStatus::Done)
            .collect()
    }

    /// Record completion
    pub fn finish(&mut self, id: JobId, code: i32) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = JobStatus::Done;
            job.exit_code = Some(code);
            log::debug!("job [{}] done with exit code {}", id, code);
        }
        let finished: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Done)
            .map(|j| j.id)
            .collect();
        let excess = finished.len().saturating_sub(MAX_FINISHED);
        for old in &finished[..excess] {
            self.jobs.remove(old);
        }
    }

    /// Deliver a signal. Only the owner or root may signal a job.
    pub fn signal(&mut self, id: JobId, signal: Signal, sender: &str) -> Result<JobStatus, JobError> {
        let job = self.jobs.get_mut(&id).ok_or(JobError::NoSuchJob(id))?;
        if sender != "root" && sender != job.owner {
            return Err(JobError::NotOwner { id });
        }
        if job.status == JobStatus::Done {
            return Err(JobError::AlreadyDone(id));
        }
        match job.control.deliver(signal) {
            SignalAction::Pause => job.status = JobStatus::Paused,
            SignalAction::Resume => job.status = JobStatus::Running,
            // stays Running until the task observes the cancel and finishes
            SignalAction::Cancel => {}
        }
        log::debug!("job [{}] received {}", id, signal);
        Ok(job.status)
    }

    /// Remove and return finished jobs
    pub fn reap(&mut self) -> Vec<Job> {
        let done: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Done)
            .map(|j| j.id)
            .collect();
        done.into_iter().filter_map(|id| self.jobs.remove(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut table = JobTable::new();
        let a = table.insert("sleep 10", "Guest", JobControl::new());
        let b = table.insert("sleep 20", "Guest", JobControl::new());
        assert_eq!((a, b), (1, 2));
        table.finish(a, 0);
        table.reap();
        let c = table.insert("sleep 30", "Guest", JobControl::new());
        assert_eq!(c, 3);
    }

    #[test]
    fn test_signal_transitions() {
        let mut table = JobTable::new();
        let control = JobControl::new();
        let id = table.insert("sleep 10", "Guest", control.clone());

        assert_eq!(table.signal(id, Signal::SIGSTOP, "Guest"), Ok(JobStatus::Paused));
        assert!(control.is_paused());
        assert_eq!(table.signal(id, Signal::SIGCONT, "Guest"), Ok(JobStatus::Running));
        assert_eq!(table.signal(id, Signal::SIGKILL, "Guest"), Ok(JobStatus::Running));
        assert!(control.is_cancelled());

        table.finish(id, 130);
        assert_eq!(table.get(id).unwrap().status, JobStatus::Done);
        assert_eq!(
            table.signal(id, Signal::SIGKILL, "Guest"),
            Err(JobError::AlreadyDone(id))
        );
    }

    #[test]
    fn test_only_owner_or_root_may_signal() {
        let mut table = JobTable::new();
        let id = table.insert("sleep 10", "Guest", JobControl::new());
        assert_eq!(
            table.signal(id, Signal::SIGKILL, "alice"),
            Err(JobError::NotOwner { id })
        );
        assert!(table.signal(id, Signal::SIGKILL, "root").is_ok());
        assert_eq!(table.signal(99, Signal::SIGKILL, "root"), Err(JobError::NoSuchJob(99)));
    }

    #[test]
    fn test_reap_removes_only_done() {
        let mut table = JobTable::new();
        let a = table.insert("a", "Guest", JobControl::new());
        table.insert("b", "Guest", JobControl::new());
        table.finish(a, 0);
        let reaped = table.reap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].command, "a");
        assert_eq!(table.list().len(), 1);
    }

    #[test]
    fn test_unreaped_finished_jobs_are_capped() {
        let mut table = JobTable::new();
        let running = table.insert("sleep 100", "Guest", JobControl::new());
        for n in 0..MAX_FINISHED + 5 {
            let id = table.insert(&format!("true {}", n), "Guest", JobControl::new());
            table.finish(id, 0);
        }
        assert_eq!(table.list().len(), MAX_FINISHED + 1);
        assert!(table.get(running).is_some());
        // the oldest finished ones went first
        assert!(table.get(running + 1).is_none());
        assert!(table.get(running + MAX_FINISHED as JobId + 5).is_some());
    }
}
