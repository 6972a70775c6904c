//! File-backed durable store
//!
//! One file per job at `{data_dir}/progress_{job_id}.{ext}`. Every write
//! replaces the whole file through a temporary sibling and a rename, so a
//! reader sees either the previous record or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{DurableBackend, JobPattern};
use crate::errors::{StoreError, StoreResult};

const FILE_PREFIX: &str = "progress_";

#[derive(Debug, Clone)]
pub struct FileDurableStore {
    data_dir: PathBuf,
    extension: String,
}

impl FileDurableStore {
    pub fn new(data_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolve the file for a job id, rejecting ids that could escape `data_dir`
    pub fn path_for(&self, job_id: &str) -> StoreResult<PathBuf> {
        let reject = |reason: &str| StoreError::PathValidation {
            path: PathBuf::from(job_id),
            reason: reason.to_string(),
        };

        if job_id.is_empty() {
            return Err(reject("job id cannot be empty"));
        }
        if job_id.contains('\0') {
            return Err(reject("job id contains null bytes"));
        }
        if job_id.contains('/') || job_id.contains('\\') {
            return Err(reject("job id contains path separators"));
        }
        if job_id.contains("..") {
            return Err(reject("job id contains parent directory references"));
        }

        Ok(self
            .data_dir
            .join(format!("{FILE_PREFIX}{job_id}.{}", self.extension)))
    }

    fn job_id_from_file_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')
            .filter(|id| !id.is_empty())
    }

    /// Matching job files, newest first
    async fn matching_files(&self, pattern: &JobPattern) -> StoreResult<Vec<(SystemTime, String)>> {
        let mut dir = match fs::read_dir(&self.data_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(job_id) = self.job_id_from_file_name(file_name) else {
                continue;
            };
            if !pattern.matches(job_id) {
                continue;
            }
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                Ok(_) => continue,
                // removed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            files.push((modified, job_id.to_string()));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(files)
    }
}

#[async_trait]
impl DurableBackend for FileDurableStore {
    fn location(&self) -> String {
        self.data_dir.display().to_string()
    }

    async fn write(&self, job_id: &str, payload: &str) -> StoreResult<()> {
        let path = self.path_for(job_id)?;
        fs::create_dir_all(&self.data_dir).await?;

        let temp_path = self.data_dir.join(format!(
            ".{FILE_PREFIX}{job_id}.{}.tmp",
            Uuid::new_v4().simple()
        ));
        if let Err(e) = fs::write(&temp_path, payload).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        trace!("Wrote {} bytes to {}", payload.len(), path.display());
        Ok(())
    }

    async fn read(&self, job_id: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(job_id)?;
        match fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, job_id: &str) -> StoreResult<bool> {
        let path = self.path_for(job_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan(&self, pattern: &JobPattern, limit: usize) -> StoreResult<Vec<(String, String)>> {
        let mut entries = Vec::new();
        for (_, job_id) in self.matching_files(pattern).await? {
            if entries.len() >= limit {
                break;
            }
            match self.read(&job_id).await? {
                Some(payload) => entries.push((job_id, payload)),
                None => trace!("Progress file for {} vanished during scan", job_id),
            }
        }
        Ok(entries)
    }

    async fn count(&self, pattern: &JobPattern) -> StoreResult<usize> {
        Ok(self.matching_files(pattern).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileDurableStore {
        FileDurableStore::new(dir.path(), "json")
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write("job-1", r#"{"v":1}"#).await.unwrap();
        store.write("job-1", r#"{"v":2}"#).await.unwrap();
        assert_eq!(store.read("job-1").await.unwrap().as_deref(), Some(r#"{"v":2}"#));
        assert!(dir.path().join("progress_job-1.json").exists());

        assert!(store.remove("job-1").await.unwrap());
        assert!(!store.remove("job-1").await.unwrap());
        assert_eq!(store.read("job-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write("job-1", "{}").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["progress_job-1.json".to_string()]);
    }

    #[test]
    fn test_path_validation() {
        let store = FileDurableStore::new("/tmp/progress", "json");
        for bad in ["", "../etc", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(store.path_for(bad), Err(StoreError::PathValidation { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(
            store.path_for("analysis_1").unwrap(),
            PathBuf::from("/tmp/progress/progress_analysis_1.json")
        );
    }

    #[tokio::test]
    async fn test_scan_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write("analysis_a", "1").await.unwrap();
        store.write("analysis_b", "2").await.unwrap();
        store.write("other", "3").await.unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        std::fs::write(dir.path().join("progress_wrong.txt"), "x").unwrap();

        let pattern = JobPattern::new("analysis_*").unwrap();
        let mut found = store.scan(&pattern, 10).await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("analysis_a".to_string(), "1".to_string()),
                ("analysis_b".to_string(), "2".to_string()),
            ]
        );

        assert_eq!(store.scan(&JobPattern::all(), 2).await.unwrap().len(), 2);
        assert_eq!(store.count(&JobPattern::all()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_scan_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::new(dir.path().join("not-created"), "json");
        assert!(store.scan(&JobPattern::all(), 10).await.unwrap().is_empty());
    }
}
