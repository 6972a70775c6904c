//! Record Codec
//!
//! Maps a [`ProgressRecord`] to and from its JSON payload. Decoding is
//! lenient: unknown fields are ignored, optional fields fall back to
//! documented defaults, and only a missing or unparseable `job_id` or
//! `status` rejects the payload.
//!
//! Defaults on decode:
//! - numbers: `0`
//! - strings: `"unknown"`
//! - `error_message` on a failed record: `"unknown"`
//! - `current_step_index`: clamped into the step plan

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::errors::{ProgressError, ProgressResult};
use crate::models::{JobParameters, JobStatus, ProgressRecord, StepInfo};

/// Placeholder for string fields the writer never reported
pub const UNKNOWN: &str = "unknown";

/// Deserialize a field as `T`, treating a wrong type like an absent field
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Serialize)]
struct EncodedRecord<'a> {
    job_id: &'a str,
    status: &'static str,
    steps: &'a [StepInfo],
    current_step_index: usize,
    progress_percentage: f64,
    last_message: &'a str,
    start_time: f64,
    last_update_time: f64,
    estimated_total_time: f64,
    elapsed_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_results: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a JobParameters>,
    // derived, for viewers that read the payload directly
    total_steps: usize,
    current_step_name: Option<&'a str>,
    current_step_description: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DecodedStep {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    weight: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DecodedRecord {
    #[serde(deserialize_with = "lenient")]
    job_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    steps: Option<Vec<DecodedStep>>,
    #[serde(deserialize_with = "lenient")]
    current_step_index: Option<usize>,
    #[serde(deserialize_with = "lenient")]
    progress_percentage: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    last_message: Option<String>,
    #[serde(deserialize_with = "lenient")]
    start_time: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    last_update_time: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    estimated_total_time: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    elapsed_time: Option<f64>,
    raw_results: Option<serde_json::Value>,
    #[serde(deserialize_with = "lenient")]
    error_message: Option<String>,
    parameters: Option<serde_json::Value>,
    // legacy names, read only when the current name is absent
    #[serde(deserialize_with = "lenient")]
    analysis_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    current_step: Option<usize>,
    #[serde(deserialize_with = "lenient")]
    last_update: Option<f64>,
}

/// Encodes and decodes progress records
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec {
    pretty: bool,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented output, used for files people may open by hand
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn encode(&self, record: &ProgressRecord) -> ProgressResult<String> {
        let current = record.current_step();
        let encoded = EncodedRecord {
            job_id: &record.job_id,
            status: record.status.as_str(),
            steps: &record.steps,
            current_step_index: record.current_step_index,
            progress_percentage: record.progress_percentage,
            last_message: &record.last_message,
            start_time: record.start_time,
            last_update_time: record.last_update_time,
            estimated_total_time: record.estimated_total_time,
            elapsed_time: record.elapsed_time,
            raw_results: record.raw_results.as_ref(),
            error_message: record.error_message.as_deref(),
            parameters: record.parameters.as_ref(),
            total_steps: record.steps.len(),
            current_step_name: current.map(|s| s.name.as_str()),
            current_step_description: current.map(|s| s.description.as_str()),
        };

        let result = if self.pretty {
            serde_json::to_string_pretty(&encoded)
        } else {
            serde_json::to_string(&encoded)
        };
        result.map_err(|e| ProgressError::malformed(&record.job_id, e.to_string()))
    }

    /// Decode a payload whose job id is not known in advance
    pub fn decode(&self, payload: &str) -> ProgressResult<ProgressRecord> {
        self.decode_as(UNKNOWN, payload)
    }

    /// Decode a payload read under `job_id`; the id labels any error
    pub fn decode_as(&self, job_id: &str, payload: &str) -> ProgressResult<ProgressRecord> {
        let decoded: DecodedRecord = serde_json::from_str(payload)
            .map_err(|e| ProgressError::malformed(job_id, e.to_string()))?;
        Self::from_decoded(job_id, decoded)
    }

    fn from_decoded(key: &str, decoded: DecodedRecord) -> ProgressResult<ProgressRecord> {
        let job_id = decoded
            .job_id
            .filter(|id| !id.trim().is_empty())
            .or(decoded.analysis_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProgressError::malformed(key, "missing job_id"))?;
        let status = decoded
            .status
            .ok_or_else(|| ProgressError::malformed(&job_id, "missing status"))?
            .parse::<JobStatus>()
            .map_err(|reason| ProgressError::malformed(&job_id, reason))?;

        let steps: Vec<StepInfo> = decoded
            .steps
            .unwrap_or_default()
            .into_iter()
            .map(|s| StepInfo {
                name: s.name.unwrap_or_else(|| UNKNOWN.to_string()),
                description: s.description.unwrap_or_else(|| UNKNOWN.to_string()),
                weight: s.weight.unwrap_or(0.0),
            })
            .collect();

        let current_step_index = decoded
            .current_step_index
            .or(decoded.current_step)
            .unwrap_or(0)
            .min(steps.len().saturating_sub(1));

        let parameters = match decoded.parameters {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => match serde_json::from_value::<JobParameters>(value) {
                Ok(parameters) => Some(parameters),
                Err(e) => {
                    warn!("Dropping unreadable parameters of job {}: {}", job_id, e);
                    None
                }
            },
        };

        let error_message = if status == JobStatus::Failed {
            Some(decoded.error_message.unwrap_or_else(|| UNKNOWN.to_string()))
        } else {
            None
        };

        Ok(ProgressRecord {
            job_id,
            status,
            steps,
            current_step_index,
            progress_percentage: decoded.progress_percentage.unwrap_or(0.0),
            last_message: decoded.last_message.unwrap_or_else(|| UNKNOWN.to_string()),
            start_time: decoded.start_time.unwrap_or(0.0),
            last_update_time: decoded
                .last_update_time
                .or(decoded.last_update)
                .unwrap_or(0.0),
            estimated_total_time: decoded.estimated_total_time.unwrap_or(0.0),
            elapsed_time: decoded.elapsed_time.unwrap_or(0.0),
            raw_results: decoded.raw_results.filter(|v| !v.is_null()),
            error_message,
            parameters,
        })
    }
}
