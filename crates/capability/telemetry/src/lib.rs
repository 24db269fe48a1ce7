//! 追踪初始化与链路计数。
//!
//! 缓冲满与积压淘汰是有意为之的有界数据丢失，必须可观测；
//! 相关计数都集中在这里。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub readings_enqueued: u64,
    pub readings_dropped: u64,
    pub batches_evicted: u64,
    pub flush_success: u64,
    pub flush_failure: u64,
    pub parse_errors: u64,
    pub commands_forwarded: u64,
    pub results_forwarded: u64,
    pub results_cached: u64,
    pub relay_errors: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    readings_enqueued: AtomicU64,
    readings_dropped: AtomicU64,
    batches_evicted: AtomicU64,
    flush_success: AtomicU64,
    flush_failure: AtomicU64,
    parse_errors: AtomicU64,
    commands_forwarded: AtomicU64,
    results_forwarded: AtomicU64,
    results_cached: AtomicU64,
    relay_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            readings_enqueued: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            batches_evicted: AtomicU64::new(0),
            flush_success: AtomicU64::new(0),
            flush_failure: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            commands_forwarded: AtomicU64::new(0),
            results_forwarded: AtomicU64::new(0),
            results_cached: AtomicU64::new(0),
            relay_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_enqueued: self.readings_enqueued.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            batches_evicted: self.batches_evicted.load(Ordering::Relaxed),
            flush_success: self.flush_success.load(Ordering::Relaxed),
            flush_failure: self.flush_failure.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            commands_forwarded: self.commands_forwarded.load(Ordering::Relaxed),
            results_forwarded: self.results_forwarded.load(Ordering::Relaxed),
            results_cached: self.results_cached.load(Ordering::Relaxed),
            relay_errors: self.relay_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录读数入队次数。
pub fn record_reading_enqueued() {
    metrics().readings_enqueued.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入缓冲失败丢弃次数（缓冲满）。
pub fn record_reading_dropped() {
    metrics().readings_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录积压淘汰的批次数（积压满，丢最旧）。
pub fn record_batch_evicted() {
    metrics().batches_evicted.fetch_add(1, Ordering::Relaxed);
}

/// 记录批次落库成功次数。
pub fn record_flush_success() {
    metrics().flush_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录批次落库失败次数。
pub fn record_flush_failure() {
    metrics().flush_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录在分发边界丢弃的畸形消息次数。
pub fn record_parse_error() {
    metrics().parse_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令通道 → broker 转发次数。
pub fn record_command_forwarded() {
    metrics().commands_forwarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录结果主题 → 命令总线转发次数。
pub fn record_result_forwarded() {
    metrics().results_forwarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录按关联 id 缓存结果次数。
pub fn record_result_cached() {
    metrics().results_cached.fetch_add(1, Ordering::Relaxed);
}

/// 记录中继传输层错误次数（重连前）。
pub fn record_relay_error() {
    metrics().relay_errors.fetch_add(1, Ordering::Relaxed);
}
