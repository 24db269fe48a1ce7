//! 设备路由注册表。
//!
//! 设备首次出现时解析其目标库：优先取外部持久化路由（Redis 键），
//! 缺省回退到固定目标库。解析结果进程生命周期内不变。

use bridge_sink::{SinkConfig, SinkWorker};
use bridge_storage::{MeasurementWriter, RoutingLookup};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// 路由错误。
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("routing lookup error: {0}")]
    Lookup(String),
}

/// 目标库 Worker 集合。
///
/// 每个目标库名最多对应一个 Worker；创建在锁内串行化，
/// 并发首次请求同一目标库也只会构造一次。
pub struct WorkerSet {
    writer: Arc<dyn MeasurementWriter>,
    config: SinkConfig,
    workers: Mutex<HashMap<String, SinkWorker>>,
}

impl WorkerSet {
    pub fn new(writer: Arc<dyn MeasurementWriter>, config: SinkConfig) -> Self {
        Self {
            writer,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// 返回目标库的 Worker；不存在则构造、启动并登记。
    pub async fn ensure(&self, destination: &str) -> SinkWorker {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get(destination) {
            return worker.clone();
        }
        info!(target: "bridge.routing", destination, "starting sink worker");
        let worker = SinkWorker::spawn(destination, self.writer.clone(), self.config.clone());
        workers.insert(destination.to_string(), worker.clone());
        worker
    }

    /// 已启动的 Worker 数（用于测试）。
    pub async fn count(&self) -> usize {
        self.workers.lock().await.len()
    }
}

/// 设备 → Worker 注册表。
pub struct DeviceRegistry {
    lookup: Arc<dyn RoutingLookup>,
    fallback: String,
    workers: WorkerSet,
    devices: Mutex<HashMap<String, SinkWorker>>,
}

impl DeviceRegistry {
    pub fn new(lookup: Arc<dyn RoutingLookup>, fallback: impl Into<String>, workers: WorkerSet) -> Self {
        Self {
            lookup,
            fallback: fallback.into(),
            workers,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// 解析设备的 Worker；首次出现时查外部路由并懒创建。
    ///
    /// 锁跨越查询持有，同一设备的并发首次解析串行执行。
    pub async fn resolve(&self, device_id: &str) -> Result<SinkWorker, RoutingError> {
        let mut devices = self.devices.lock().await;
        if let Some(worker) = devices.get(device_id) {
            return Ok(worker.clone());
        }
        let destination = self
            .lookup
            .destination_for(device_id)
            .await
            .map_err(|err| RoutingError::Lookup(err.to_string()))?
            .unwrap_or_else(|| self.fallback.clone());
        info!(
            target: "bridge.routing",
            device_id,
            destination = %destination,
            "device routed"
        );
        let worker = self.workers.ensure(&destination).await;
        devices.insert(device_id.to_string(), worker.clone());
        Ok(worker)
    }

    /// 已启动的 Worker 数（用于测试）。
    pub async fn worker_count(&self) -> usize {
        self.workers.count().await
    }
}
