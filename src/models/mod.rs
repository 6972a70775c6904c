//! Progress record data model
//!
//! A [`ProgressRecord`] is the unit of persisted state for one job. It is
//! written as a whole (never patched per field) to both storage backends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "⏳",
            JobStatus::Running => "🔄",
            JobStatus::Completed => "✅",
            JobStatus::Failed => "❌",
        }
    }

    /// Human-readable label for list views
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "Initializing",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initializing" => Ok(JobStatus::Initializing),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            // older writers reported failures as "error"
            "failed" | "error" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Analysis modules a job can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisModule {
    Market,
    Fundamentals,
    News,
    Social,
}

impl AnalysisModule {
    pub const ALL: [AnalysisModule; 4] = [
        AnalysisModule::Market,
        AnalysisModule::Fundamentals,
        AnalysisModule::News,
        AnalysisModule::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisModule::Market => "market",
            AnalysisModule::Fundamentals => "fundamentals",
            AnalysisModule::News => "news",
            AnalysisModule::Social => "social",
        }
    }

    /// Optional modules are dropped from fast (depth 1) plans
    pub fn is_optional(&self) -> bool {
        matches!(self, AnalysisModule::News | AnalysisModule::Social)
    }
}

impl fmt::Display for AnalysisModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisModule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(AnalysisModule::Market),
            "fundamentals" => Ok(AnalysisModule::Fundamentals),
            "news" => Ok(AnalysisModule::News),
            "social" => Ok(AnalysisModule::Social),
            other => Err(format!("unknown analysis module '{other}'")),
        }
    }
}

/// Lowest and highest supported research depth
pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 5;

/// Human-readable name of a research depth
pub fn depth_text(depth: Option<u8>) -> &'static str {
    match depth {
        Some(1) => "fast",
        Some(2) => "standard",
        Some(3) => "deep",
        Some(4) => "thorough",
        Some(5) => "exhaustive",
        _ => "unknown",
    }
}

/// Parameters supplied by the job-start call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub modules: Vec<AnalysisModule>,
    pub depth: u8,
    pub provider: String,
}

impl JobParameters {
    pub fn new(modules: Vec<AnalysisModule>, depth: u8, provider: impl Into<String>) -> Self {
        Self {
            modules,
            depth,
            provider: provider.into(),
        }
    }

    /// Depth-1 plans collapse deliberation and skip optional modules
    pub fn is_fast(&self) -> bool {
        self.depth <= MIN_DEPTH
    }
}

/// One named phase of a step plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub name: String,
    pub description: String,
    /// Relative share of the job's total work
    pub weight: f64,
}

impl StepInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            weight,
        }
    }
}

/// Persisted progress state of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub steps: Vec<StepInfo>,
    pub current_step_index: usize,
    pub progress_percentage: f64,
    pub last_message: String,
    pub start_time: f64,
    pub last_update_time: f64,
    pub estimated_total_time: f64,
    /// Frozen on terminal states; derived from `start_time` while running
    pub elapsed_time: f64,
    /// Attached only on completion
    pub raw_results: Option<serde_json::Value>,
    /// Present only when failed
    pub error_message: Option<String>,
    pub parameters: Option<JobParameters>,
}

impl ProgressRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current_step(&self) -> Option<&StepInfo> {
        self.steps.get(self.current_step_index)
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn depth(&self) -> Option<u8> {
        self.parameters.as_ref().map(|p| p.depth)
    }

    /// Elapsed seconds as of `now`: frozen on terminal states, live otherwise
    pub fn elapsed_at(&self, now: f64) -> f64 {
        if self.is_terminal() || self.start_time <= 0.0 {
            self.elapsed_time
        } else {
            (now - self.start_time).max(0.0)
        }
    }

    /// Remaining seconds as of `now`, never negative, zero once terminal
    pub fn remaining_at(&self, now: f64) -> f64 {
        if self.is_terminal() {
            return 0.0;
        }
        (self.estimated_total_time - self.elapsed_at(now)).max(0.0)
    }
}

/// Generate a job id in the `analysis_{8 hex}_{unix seconds}` form
pub fn generate_job_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let seconds = crate::utils::now_epoch() as u64;
    format!("analysis_{}_{}", &hex[..8], seconds)
}
