//! 存储接口 Trait 定义
//!
//! 定义桥接进程依赖的三个外部存储接口：
//! - MeasurementWriter：时序读数批量写入
//! - RoutingLookup：设备 → 目标库名查询
//! - ResultCache：命令结果按关联 id 缓存
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use async_trait::async_trait;
use domain::Reading;

/// 时序读数写入接口
///
/// 一次调用写入一个目标库的一个有序批次；整批要么全部落库，
/// 要么整体失败（由调用方重试）。
#[async_trait]
pub trait MeasurementWriter: Send + Sync {
    /// 批量写入一个目标库的读数
    async fn write_batch(
        &self,
        destination: &str,
        readings: &[Reading],
    ) -> Result<usize, StorageError>;
}

/// 设备路由查询接口
///
/// 查询设备显式配置的目标库名；未配置时返回 None，由调用方回退。
#[async_trait]
pub trait RoutingLookup: Send + Sync {
    /// 查询设备的目标库名
    async fn destination_for(&self, device_id: &str) -> Result<Option<String>, StorageError>;
}

/// 命令结果缓存接口
///
/// 按关联 id 缓存结果报文，供带外消费方点查；条目带固定过期时间。
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// 写入一条结果缓存
    async fn store(
        &self,
        correlation_id: &str,
        body: &str,
        ttl_seconds: u64,
    ) -> Result<(), StorageError>;
}
