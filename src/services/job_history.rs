//! Job history service
//!
//! Keeps the most recent ingestion commits and distribution runs in memory,
//! mirrored to a JSON file so the list survives worker restarts.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use chrono::{DateTime, Utc};

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE: &str = "logs/job-history.json";

pub const JOB_INGEST_COMMIT: &str = "ingest.commit";
pub const JOB_DISTRIBUTION_RUN: &str = "distribution.run";

/// Final state of a recorded job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    /// Finished with some rows or items failing
    Partial,
    Failed,
}

/// Job entry in history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub details: Option<String>,
}

/// Response for listing job history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryResponse {
    pub jobs: Vec<JobHistoryEntry>,
    pub total: usize,
}

/// Job history storage backed by an in-memory deque + JSON file on disk.
pub struct JobHistoryService {
    history: Arc<RwLock<VecDeque<JobHistoryEntry>>>,
    persist: bool,
}

impl JobHistoryService {
    pub fn new() -> Self {
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = Self::load_from_disk() {
            for entry in loaded.into_iter().take(MAX_HISTORY_SIZE) {
                deque.push_back(entry);
            }
            info!("Loaded {} job history entries from disk", deque.len());
        }
        Self {
            history: Arc::new(RwLock::new(deque)),
            persist: true,
        }
    }

    /// History that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE))),
            persist: false,
        }
    }

    pub fn record_completed(&self, job_type: &str, user_id: &str, started_at: DateTime<Utc>, details: Option<String>) {
        self.record(job_type, user_id, started_at, JobStatus::Completed, None, details);
    }

    pub fn record_partial(&self, job_type: &str, user_id: &str, started_at: DateTime<Utc>, details: Option<String>) {
        self.record(job_type, user_id, started_at, JobStatus::Partial, None, details);
    }

    pub fn record_failed(
        &self,
        job_type: &str,
        user_id: &str,
        started_at: DateTime<Utc>,
        error: String,
        details: Option<String>,
    ) {
        self.record(job_type, user_id, started_at, JobStatus::Failed, Some(error), details);
    }

    fn record(
        &self,
        job_type: &str,
        user_id: &str,
        started_at: DateTime<Utc>,
        status: JobStatus,
        error: Option<String>,
        details: Option<String>,
    ) {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        self.add_entry(JobHistoryEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            job_type: job_type.to_string(),
            status,
            started_at,
            completed_at,
            duration_ms,
            error,
            details,
        });
    }

    fn add_entry(&self, entry: JobHistoryEntry) {
        let mut history = self.history.write();

        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }

        history.push_front(entry);

        if self.persist {
            Self::save_to_disk(&history);
        }
    }

    /// Recent jobs of all users (admin view)
    pub fn get_recent(&self, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .take(limit)
            .cloned()
            .collect();
        let total = history.len();

        JobHistoryResponse { jobs, total }
    }

    /// Get recent job history started by one user
    pub fn get_recent_for_user(&self, user_id: &str, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .filter(|j| j.user_id == user_id)
            .take(limit)
            .cloned()
            .collect();
        let total = jobs.len();

        JobHistoryResponse { jobs, total }
    }

    fn load_from_disk() -> Option<Vec<JobHistoryEntry>> {
        let path = Path::new(HISTORY_FILE);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<JobHistoryEntry>>(&content) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    warn!("Failed to parse job history file: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read job history file: {}", e);
                None
            }
        }
    }

    fn save_to_disk(history: &VecDeque<JobHistoryEntry>) {
        let path = Path::new(HISTORY_FILE);
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create job history directory: {}", e);
                return;
            }
        }
        let entries: Vec<&JobHistoryEntry> = history.iter().collect();
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("Failed to write job history file: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize job history: {}", e),
        }
    }
}

impl Default for JobHistoryService {
    fn default() -> Self {
        Self::new()
    }
}

// Global instance for easy access
lazy_static::lazy_static! {
    pub static ref JOB_HISTORY: JobHistoryService = JobHistoryService::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_completed_job() {
        let service = JobHistoryService::in_memory();
        let started_at = Utc::now() - chrono::Duration::seconds(5);

        service.record_completed(JOB_INGEST_COMMIT, "u1", started_at, Some("5/5 rows".to_string()));

        let history = service.get_recent(10);
        assert_eq!(history.jobs.len(), 1);
        assert_eq!(history.jobs[0].status, JobStatus::Completed);
        assert_eq!(history.jobs[0].user_id, "u1");
        assert!(history.jobs[0].duration_ms >= 5000);
    }

    #[test]
    fn test_record_failed_and_partial_jobs() {
        let service = JobHistoryService::in_memory();

        service.record_partial(JOB_INGEST_COMMIT, "u1", Utc::now(), Some("3/5 rows".to_string()));
        service.record_failed(JOB_DISTRIBUTION_RUN, "u1", Utc::now(), "connection reset".to_string(), None);

        let history = service.get_recent(10);
        assert_eq!(history.jobs[0].status, JobStatus::Failed);
        assert_eq!(history.jobs[0].error.as_deref(), Some("connection reset"));
        assert_eq!(history.jobs[1].status, JobStatus::Partial);
    }

    #[test]
    fn test_history_limit() {
        let service = JobHistoryService::in_memory();

        for i in 0..150 {
            service.record_completed(JOB_DISTRIBUTION_RUN, "admin", Utc::now(), Some(format!("Job {}", i)));
        }

        let history = service.get_recent(200);
        assert_eq!(history.jobs.len(), MAX_HISTORY_SIZE);
        assert_eq!(history.jobs[0].details.as_deref(), Some("Job 149"));
    }

    #[test]
    fn test_get_recent_for_user_isolates_users() {
        let service = JobHistoryService::in_memory();

        service.record_completed(JOB_INGEST_COMMIT, "a", Utc::now(), None);
        service.record_completed(JOB_DISTRIBUTION_RUN, "b", Utc::now(), None);
        service.record_partial(JOB_INGEST_COMMIT, "a", Utc::now(), None);

        let history_a = service.get_recent_for_user("a", 50);
        assert_eq!(history_a.jobs.len(), 2);
        assert!(history_a.jobs.iter().all(|j| j.user_id == "a"));

        let history_b = service.get_recent_for_user("b", 50);
        assert_eq!(history_b.total, 1);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Partial).unwrap(), "\"partial\"");
    }
}
