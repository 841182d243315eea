//! # State tree data model.
//!
//! [`AppState`] is the canonical tree owned by the [`StateStore`](crate::StateStore).
//! Every region serializes to JSON so that it can be addressed by dot paths
//! (`jobs.j1.status`, `countdown.time_left`, ...).

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level region names accepted by path addressing.
pub const REGIONS: &[&str] = &[
    "selected_files",
    "jobs",
    "cohorts",
    "displayed_cohorts",
    "countdown",
    "spinner",
];

/// The whole state tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppState {
    /// Files picked by the user, in selection order.
    #[serde(default)]
    pub selected_files: Vec<FileRef>,
    /// Job records by id, in insertion order.
    #[serde(default)]
    pub jobs: IndexMap<String, JobRecord>,
    /// Cohort records by id, in insertion order.
    #[serde(default)]
    pub cohorts: IndexMap<String, CohortRecord>,
    /// Cohorts currently shown.
    #[serde(default)]
    pub displayed_cohorts: IndexSet<String>,
    #[serde(default)]
    pub countdown: Countdown,
    #[serde(default)]
    pub spinner: Spinner,
}

/// A user-selected input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// MIME type or sniffed format, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            kind: None,
        }
    }
}

/// Lifecycle status of a job as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Queued,
    Started,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// `true` for states a job never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// One submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Back-reference to the owning cohort, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Collaborator-defined fields (results, progress, messages, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields used to seed or patch a [`JobRecord`].
///
/// `None` fields are left untouched by `update_job`; `extra` entries are merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub file_name: Option<String>,
    pub cohort_id: Option<String>,
    pub extra: Map<String, Value>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_cohort(mut self, cohort_id: impl Into<String>) -> Self {
        self.cohort_id = Some(cohort_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl JobRecord {
    /// Builds a fresh record stamped with `now`.
    pub(crate) fn seeded(patch: JobPatch, now: DateTime<Utc>) -> Self {
        Self {
            status: patch.status.unwrap_or_default(),
            file_name: patch.file_name,
            cohort_id: patch.cohort_id,
            created_at: now,
            updated_at: now,
            extra: patch.extra,
        }
    }

    /// Merges `patch` into the record and bumps `updated_at`.
    pub(crate) fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.file_name.is_some() {
            self.file_name = patch.file_name;
        }
        if patch.cohort_id.is_some() {
            self.cohort_id = patch.cohort_id;
        }
        self.extra.extend(patch.extra);
        self.updated_at = now;
    }
}

/// A named group of jobs evaluated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRecord {
    pub alias: String,
    /// Member jobs, unique, in insertion order.
    #[serde(default)]
    pub job_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Refresh countdown shown while jobs are polled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub time_left: u32,
    /// Mirrors whether the tick task is running.
    pub is_active: bool,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Reference-counted busy indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spinner {
    /// Always `count > 0`.
    pub is_active: bool,
    pub count: u32,
}
