//! Memory store whose reads or writes can be switched to fail, for exercising storage errors.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{CacheError, KeyValueStore, MemoryKeyValueStore};

#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryKeyValueStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn busy() -> CacheError {
        CacheError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::busy());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::busy());
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::busy());
        }
        self.inner.remove(key).await
    }
}
