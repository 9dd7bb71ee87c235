use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::asset::Asset;
use super::descriptors::ExtractedMetadata;
use super::rendition::RenditionSet;

/// Upper bound for the delay between two attempts of a job.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    ExtractMetadata,
    GenerateThumbnails,
    Transcode,
    Cleanup,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Ingest,
        JobKind::ExtractMetadata,
        JobKind::GenerateThumbnails,
        JobKind::Transcode,
        JobKind::Cleanup,
    ];

    pub fn policy(&self) -> RetryPolicy {
        match self {
            JobKind::Ingest => RetryPolicy::new(5, 2, Priority::High, 0),
            JobKind::ExtractMetadata => RetryPolicy::new(3, 2, Priority::High, 0),
            JobKind::GenerateThumbnails => RetryPolicy::new(3, 2, Priority::Normal, 0),
            JobKind::Transcode => RetryPolicy::new(2, 10, Priority::Low, 5),
            JobKind::Cleanup => RetryPolicy::new(5, 30, Priority::Lowest, 30),
        }
    }

    /// Kinds that can be enqueued on their own for an already completed asset.
    pub fn is_auxiliary(&self) -> bool {
        matches!(
            self,
            JobKind::ExtractMetadata | JobKind::GenerateThumbnails | JobKind::Transcode
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::ExtractMetadata => "extract_metadata",
            JobKind::GenerateThumbnails => "generate_thumbnails",
            JobKind::Transcode => "transcode",
            JobKind::Cleanup => "cleanup",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid job kind: {}", s))
    }
}

/// Per-kind attempt budget and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_backoff_secs: u64,
    pub priority: Priority,
    pub initial_delay_secs: u64,
}

impl RetryPolicy {
    const fn new(
        max_attempts: i32,
        base_backoff_secs: u64,
        priority: Priority,
        initial_delay_secs: u64,
    ) -> Self {
        Self {
            max_attempts,
            base_backoff_secs,
            priority,
            initial_delay_secs,
        }
    }

    /// Delay before the next attempt after `attempts` failed ones:
    /// `base * 2^(attempts - 1)`, capped.
    pub fn backoff_after(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(MAX_RETRY_BACKOFF_SECS);
        Duration::from_secs(secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Retrying,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Retrying => "retrying",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "retrying" => Ok(JobState::Retrying),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Lowest = 1,
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
    Critical = 10,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=1 => Priority::Lowest,
            2..=3 => Priority::Low,
            4..=6 => Priority::Normal,
            7..=9 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

/// Kind-specific job input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Work on the asset's current content
    Asset,
    /// Objects to delete
    Cleanup { storage_keys: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub at: DateTime<Utc>,
    pub level: JobLogLevel,
    pub message: String,
}

impl JobLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::at_level(JobLogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::at_level(JobLogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::at_level(JobLogLevel::Error, message)
    }

    fn at_level(level: JobLogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Terminal error of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub priority: Priority,
    pub payload: JobPayload,
    pub attempts: i32,
    pub max_attempts: i32,
    pub worker_id: Option<String>,
    pub logs: Vec<JobLogEntry>,
    pub error: Option<JobError>,
    /// Shared by every attempt of one job; an explicit retry starts a new lineage
    pub lineage_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ProcessingJob {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_ready_to_run(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Queued | JobState::Retrying) && self.run_at <= now
    }
}

/// A job about to be written by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub kind: JobKind,
    pub priority: Priority,
    pub payload: JobPayload,
    pub max_attempts: i32,
    pub lineage_id: Uuid,
    pub run_at: DateTime<Utc>,
}

impl NewJob {
    /// Job of `kind` over the asset's content, scheduled per the kind's policy.
    pub fn for_asset(asset: &Asset, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self::build(asset, kind, JobPayload::Asset, now)
    }

    /// Cleanup job deleting `storage_keys`.
    pub fn cleanup(asset: &Asset, storage_keys: Vec<String>, now: DateTime<Utc>) -> Self {
        Self::build(
            asset,
            JobKind::Cleanup,
            JobPayload::Cleanup { storage_keys },
            now,
        )
    }

    fn build(asset: &Asset, kind: JobKind, payload: JobPayload, now: DateTime<Utc>) -> Self {
        let policy = kind.policy();
        let delay = chrono::Duration::seconds(policy.initial_delay_secs as i64);
        Self {
            id: Uuid::new_v4(),
            asset_id: asset.id,
            organization_id: asset.organization_id,
            kind,
            priority: policy.priority,
            payload,
            max_attempts: policy.max_attempts,
            lineage_id: Uuid::new_v4(),
            run_at: now + delay,
        }
    }

    pub fn into_job(self, queued_at: DateTime<Utc>) -> ProcessingJob {
        ProcessingJob {
            id: self.id,
            asset_id: self.asset_id,
            organization_id: self.organization_id,
            kind: self.kind,
            state: JobState::Queued,
            priority: self.priority,
            payload: self.payload,
            attempts: 0,
            max_attempts: self.max_attempts,
            worker_id: None,
            logs: vec![JobLogEntry {
                at: queued_at,
                level: JobLogLevel::Info,
                message: format!("queued {} job", self.kind),
            }],
            error: None,
            lineage_id: self.lineage_id,
            run_at: self.run_at,
            queued_at,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

/// Everything a successful job produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub metadata: ExtractedMetadata,
    pub renditions: RenditionSet,
}

impl JobArtifacts {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.renditions.is_empty()
    }
}

/// Result reported back for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobArtifacts),
    Failed { code: String, error: JobError },
}

/// Terminal write for a job, applied in the same commit as the asset change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFinish {
    pub job_id: Uuid,
    pub state: JobState,
    pub error: Option<JobError>,
    pub finished_at: DateTime<Utc>,
}

impl JobFinish {
    pub fn completed(job_id: Uuid, finished_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: JobState::Completed,
            error: None,
            finished_at,
        }
    }

    pub fn failed(job_id: Uuid, error: JobError, finished_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            error: Some(error),
            finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies() {
        let ingest = JobKind::Ingest.policy();
        assert_eq!(ingest.max_attempts, 5);
        assert_eq!(ingest.priority, Priority::High);
        assert_eq!(ingest.initial_delay(), Duration::ZERO);

        let transcode = JobKind::Transcode.policy();
        assert_eq!(transcode.max_attempts, 2);
        assert_eq!(transcode.priority, Priority::Low);
        assert_eq!(transcode.initial_delay(), Duration::from_secs(5));

        let cleanup = JobKind::Cleanup.policy();
        assert_eq!(cleanup.priority, Priority::Lowest);
        assert_eq!(cleanup.initial_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let ingest = JobKind::Ingest.policy();
        assert_eq!(ingest.backoff_after(1), Duration::from_secs(2));
        assert_eq!(ingest.backoff_after(2), Duration::from_secs(4));
        assert_eq!(ingest.backoff_after(3), Duration::from_secs(8));

        let cleanup = JobKind::Cleanup.policy();
        assert_eq!(cleanup.backoff_after(1), Duration::from_secs(30));
        assert_eq!(cleanup.backoff_after(5), Duration::from_secs(300));
        assert_eq!(cleanup.backoff_after(1000), Duration::from_secs(300));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Lowest < Priority::Low);
        assert_eq!(Priority::from_i32(Priority::Lowest.as_i32()), Priority::Lowest);
        assert_eq!(Priority::from_i32(Priority::High.as_i32()), Priority::High);
    }

    #[test]
    fn test_kind_round_trips() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!(!JobKind::Ingest.is_auxiliary());
        assert!(!JobKind::Cleanup.is_auxiliary());
        assert!(JobKind::Transcode.is_auxiliary());
    }

    #[test]
    fn test_payload_serialization() {
        let payload = JobPayload::Cleanup {
            storage_keys: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "cleanup");
        assert_eq!(
            serde_json::from_value::<JobPayload>(json).unwrap(),
            payload
        );
        let json = serde_json::to_value(JobPayload::Asset).unwrap();
        assert_eq!(json, serde_json::json!({"type": "asset"}));
    }
}
