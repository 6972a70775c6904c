//! Job-id glob patterns shared by both backends

use regex::Regex;

use crate::errors::{ProgressError, ProgressResult};

/// A job-id glob where `*` matches any run of characters
#[derive(Debug, Clone)]
pub struct JobPattern {
    glob: String,
    /// `None` matches everything
    regex: Option<Regex>,
}

impl JobPattern {
    pub fn new(glob: &str) -> ProgressResult<Self> {
        let glob = if glob.trim().is_empty() { "*" } else { glob.trim() };
        if glob.chars().all(|c| c == '*') {
            return Ok(Self::all());
        }
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$")).map_err(|e| {
            ProgressError::invalid_parameters(format!("invalid job pattern '{glob}': {e}"))
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex: Some(regex),
        })
    }

    /// Pattern matching every job
    pub fn all() -> Self {
        Self {
            glob: "*".to_string(),
            regex: None,
        }
    }

    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, job_id: &str) -> bool {
        self.regex.as_ref().is_none_or(|r| r.is_match(job_id))
    }

    /// Key pattern for stores with Redis-style glob matching
    pub fn key_glob(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(prefix.len() + self.glob.len());
        for c in prefix.chars() {
            push_escaped(&mut out, c);
        }
        for c in self.glob.chars() {
            if c == '*' {
                out.push('*');
            } else {
                push_escaped(&mut out, c);
            }
        }
        out
    }
}

fn push_escaped(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
        out.push('\\');
    }
    out.push(c);
}
