#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use analysis_progress::errors::{StoreError, StoreResult};
use analysis_progress::storage::{
    DualBackendStore, DurableBackend, ExpiringBackend, FileDurableStore, InMemoryExpiringStore,
    JobPattern, StoreSettings,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// File store whose writes can be switched to fail
pub struct FlakyDurable {
    inner: FileDurableStore,
    fail_writes: AtomicBool,
}

impl FlakyDurable {
    pub fn new(dir: &TempDir) -> Self {
        Self {
            inner: FileDurableStore::new(dir.path(), "json"),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableBackend for FlakyDurable {
    fn location(&self) -> String {
        self.inner.location()
    }

    async fn write(&self, job_id: &str, payload: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("simulated disk failure"));
        }
        self.inner.write(job_id, payload).await
    }

    async fn read(&self, job_id: &str) -> StoreResult<Option<String>> {
        self.inner.read(job_id).await
    }

    async fn remove(&self, job_id: &str) -> StoreResult<bool> {
        self.inner.remove(job_id).await
    }

    async fn scan(&self, pattern: &JobPattern, limit: usize) -> StoreResult<Vec<(String, String)>> {
        self.inner.scan(pattern, limit).await
    }

    async fn count(&self, pattern: &JobPattern) -> StoreResult<usize> {
        self.inner.count(pattern).await
    }
}

/// In-memory expiring store whose writes can be switched to fail
pub struct FlakyExpiring {
    inner: InMemoryExpiringStore,
    fail_writes: AtomicBool,
}

impl FlakyExpiring {
    pub fn new() -> Self {
        Self {
            inner: InMemoryExpiringStore::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExpiringBackend for FlakyExpiring {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("simulated cache failure"));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn scan(
        &self,
        prefix: &str,
        pattern: &JobPattern,
        limit: usize,
    ) -> StoreResult<Vec<(String, String)>> {
        self.inner.scan(prefix, pattern, limit).await
    }

    async fn count(&self, prefix: &str, pattern: &JobPattern) -> StoreResult<usize> {
        self.inner.count(prefix, pattern).await
    }
}

pub fn settings() -> StoreSettings {
    StoreSettings {
        ttl: Duration::from_secs(3600),
        key_prefix: "progress:".to_string(),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub durable: Arc<FlakyDurable>,
    pub expiring: Arc<InMemoryExpiringStore>,
    pub store: Arc<DualBackendStore>,
}

pub fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let durable = Arc::new(FlakyDurable::new(&dir));
    let expiring = Arc::new(InMemoryExpiringStore::new());
    let store = Arc::new(DualBackendStore::new(
        durable.clone(),
        Some(expiring.clone()),
        settings(),
    ));
    Harness {
        dir,
        durable,
        expiring,
        store,
    }
}
