//! 存储接口内存实现
//!
//! 仅用于本地测试和占位。

use crate::error::StorageError;
use crate::traits::{MeasurementWriter, ResultCache, RoutingLookup};
use domain::Reading;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 时序写入内存存储
///
/// 记录每次写入的（目标库，批次）对；可注入若干次失败以测试重试路径。
pub struct InMemoryMeasurementWriter {
    batches: RwLock<Vec<(String, Vec<Reading>)>>,
    fail_remaining: AtomicUsize,
}

impl InMemoryMeasurementWriter {
    pub fn new() -> Self {
        Self {
            batches: RwLock::new(Vec::new()),
            fail_remaining: AtomicUsize::new(0),
        }
    }

    /// 令接下来 n 次写入失败（用于测试）
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// 已写入的批次数（用于测试）
    pub fn batch_count(&self) -> usize {
        self.batches.read().map(|b| b.len()).unwrap_or(0)
    }

    /// 已写入的读数总数（用于测试）
    pub fn reading_count(&self) -> usize {
        self.batches
            .read()
            .map(|b| b.iter().map(|(_, readings)| readings.len()).sum())
            .unwrap_or(0)
    }

    /// 全部已写入批次的拷贝（用于测试）
    pub fn batches(&self) -> Vec<(String, Vec<Reading>)> {
        self.batches.read().map(|b| b.clone()).unwrap_or_default()
    }
}

impl Default for InMemoryMeasurementWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MeasurementWriter for InMemoryMeasurementWriter {
    async fn write_batch(
        &self,
        destination: &str,
        readings: &[Reading],
    ) -> Result<usize, StorageError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::new("forced failure"));
        }
        let mut batches = self
            .batches
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        batches.push((destination.to_string(), readings.to_vec()));
        Ok(readings.len())
    }
}

/// 设备路由内存查询
pub struct InMemoryRoutingLookup {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryRoutingLookup {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 预置一条路由（用于测试）
    pub fn insert(&self, device_id: &str, destination: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(device_id.to_string(), destination.to_string());
        }
    }
}

impl Default for InMemoryRoutingLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RoutingLookup for InMemoryRoutingLookup {
    async fn destination_for(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries.get(device_id).cloned())
    }
}

/// 命令结果内存缓存
pub struct InMemoryResultCache {
    entries: RwLock<HashMap<String, (String, u64)>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 读取一条缓存（用于测试）
    pub fn get(&self, correlation_id: &str) -> Option<(String, u64)> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(correlation_id).cloned())
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResultCache for InMemoryResultCache {
    async fn store(
        &self,
        correlation_id: &str,
        body: &str,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        entries.insert(correlation_id.to_string(), (body.to_string(), ttl_seconds));
        Ok(())
    }
}
