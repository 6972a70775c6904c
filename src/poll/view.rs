//! Render-ready projection of a progress snapshot

use serde::Serialize;

use crate::errors::BackendKind;
use crate::models::{JobStatus, ProgressRecord};
use crate::utils::format_seconds;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub job_id: String,
    pub status: JobStatus,
    pub status_icon: &'static str,
    pub progress_percentage: f64,
    pub current_step_name: Option<String>,
    pub current_step_description: Option<String>,
    /// One-based position of the current step
    pub step_number: usize,
    pub total_steps: usize,
    pub last_message: String,
    pub elapsed_text: String,
    pub remaining_text: String,
    pub depth: Option<u8>,
    pub is_terminal: bool,
    pub error_message: Option<String>,
    pub source: BackendKind,
}

impl ProgressView {
    pub fn from_record(record: &ProgressRecord, source: BackendKind, now: f64) -> Self {
        let current = record.current_step();
        let step_number = if record.steps.is_empty() {
            0
        } else {
            record.current_step_index + 1
        };
        Self {
            job_id: record.job_id.clone(),
            status: record.status,
            status_icon: record.status.icon(),
            progress_percentage: record.progress_percentage,
            current_step_name: current.map(|s| s.name.clone()),
            current_step_description: current.map(|s| s.description.clone()),
            step_number,
            total_steps: record.total_steps(),
            last_message: record.last_message.clone(),
            elapsed_text: format_seconds(record.elapsed_at(now)),
            remaining_text: format_seconds(record.remaining_at(now)),
            depth: record.depth(),
            is_terminal: record.is_terminal(),
            error_message: record.error_message.clone(),
            source,
        }
    }

    /// `"step k of n"`, or empty for a plan without steps
    pub fn step_position(&self) -> String {
        if self.total_steps == 0 {
            String::new()
        } else {
            format!("step {} of {}", self.step_number, self.total_steps)
        }
    }

    /// Single status line for terminal output
    pub fn status_line(&self) -> String {
        let step = self
            .current_step_name
            .as_deref()
            .map(|name| format!(" [{name}, {}]", self.step_position()))
            .unwrap_or_default();
        let tail = match self.status {
            JobStatus::Failed => format!(
                "error: {}",
                self.error_message.as_deref().unwrap_or(&self.last_message)
            ),
            JobStatus::Completed => format!("{} (took {})", self.last_message, self.elapsed_text),
            _ => format!(
                "{} (elapsed {}, remaining ~{})",
                self.last_message, self.elapsed_text, self.remaining_text
            ),
        };
        format!(
            "{} {:>5.1}%{} {}",
            self.status_icon, self.progress_percentage, step, tail
        )
    }
}
