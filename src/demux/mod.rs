// Subtitle demux: per-job state plus the self-correcting extraction ladder

pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use orchestrator::*;

use crate::timeline::TimelineAssessment;
use crate::track::Track;

/// One rung of the extraction ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rung {
    /// Map every subtitle stream straight to SRT
    Primary,
    /// Remux to Matroska, split per stream, convert each copy
    StreamCopy,
    /// Rerun extraction with timestamp regeneration
    RepairNormalized,
    /// Isolate each stream with zero-based timestamps, then convert
    RepairIsolated,
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rung::Primary => "primary",
            Rung::StreamCopy => "stream-copy",
            Rung::RepairNormalized => "repair-normalized",
            Rung::RepairIsolated => "repair-isolated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

/// State of one extraction request. The input buffer is owned by the job.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub job_id: String,
    pub input: Vec<u8>,
    pub strategies_attempted: Vec<Rung>,
    pub produced_tracks: Vec<Track>,
    pub assessment: Option<TimelineAssessment>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn new<S: Into<String>>(job_id: S, input: Vec<u8>) -> Self {
        Self {
            job_id: job_id.into(),
            input,
            strategies_attempted: Vec::new(),
            produced_tracks: Vec::new(),
            assessment: None,
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = ExtractionJob::new("job-1", vec![1, 2, 3]);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.strategies_attempted.is_empty());
        assert!(job.elapsed() >= chrono::Duration::zero());
    }

    #[test]
    fn test_rung_names() {
        assert_eq!(Rung::RepairIsolated.to_string(), "repair-isolated");
        assert_eq!(serde_json::to_string(&Rung::StreamCopy).unwrap(), "\"stream-copy\"");
    }
}
