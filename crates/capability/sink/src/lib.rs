//! 目标库写后队列。
//!
//! 每个目标库一个 Worker：入站缓冲（有界）收集读数，固定周期合并成批，
//! 进入有界积压后按先后顺序落库。落库失败的批次退回积压头部，下个周期
//! 先于任何后来批次重试；积压满时淘汰最旧批次。两级有界缓冲把慢存储与
//! 消息分发路径解耦，并给出最坏内存上界。

use bridge_storage::MeasurementWriter;
use bridge_telemetry::{
    record_batch_evicted, record_flush_failure, record_flush_success, record_reading_dropped,
    record_reading_enqueued,
};
use domain::Reading;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 写后队列参数。
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    pub backlog_capacity: usize,
    pub flush_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_240,
            backlog_capacity: 1_024,
            flush_interval: Duration::from_millis(500),
        }
    }
}

impl SinkConfig {
    fn sanitized(mut self) -> Self {
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        if self.backlog_capacity == 0 {
            self.backlog_capacity = 1;
        }
        self
    }
}

/// 单个目标库的写入句柄。
///
/// 句柄可克隆；同一目标库的全部读数进入同一条缓冲，保持到达顺序。
#[derive(Clone)]
pub struct SinkWorker {
    destination: Arc<str>,
    sender: mpsc::Sender<Reading>,
}

impl SinkWorker {
    /// 启动一个目标库的刷盘任务并返回句柄。
    pub fn spawn(
        destination: impl Into<String>,
        writer: Arc<dyn MeasurementWriter>,
        config: SinkConfig,
    ) -> Self {
        let config = config.sanitized();
        let destination: Arc<str> = destination.into().into();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let task = FlushTask {
            destination: destination.clone(),
            writer,
            receiver,
            backlog: VecDeque::new(),
            backlog_capacity: config.backlog_capacity,
        };
        tokio::spawn(task.run(config.flush_interval));
        Self {
            destination,
            sender,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// 读数入队；缓冲满时拒绝并计数，绝不阻塞分发路径。
    pub fn append(&self, reading: Reading) {
        match self.sender.try_send(reading) {
            Ok(()) => record_reading_enqueued(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_reading_dropped();
                warn!(
                    target: "bridge.sink",
                    destination = %self.destination,
                    "incoming buffer full, reading dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    target: "bridge.sink",
                    destination = %self.destination,
                    "flush task gone, reading dropped"
                );
            }
        }
    }
}

struct FlushTask {
    destination: Arc<str>,
    writer: Arc<dyn MeasurementWriter>,
    receiver: mpsc::Receiver<Reading>,
    backlog: VecDeque<Vec<Reading>>,
    backlog_capacity: usize,
}

impl FlushTask {
    async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    /// 一个刷盘周期：收批、入积压、按序落库。
    async fn run_cycle(&mut self) {
        let mut batch = Vec::new();
        while let Ok(reading) = self.receiver.try_recv() {
            batch.push(reading);
        }
        if !batch.is_empty() {
            if self.backlog.len() >= self.backlog_capacity {
                self.backlog.pop_front();
                record_batch_evicted();
                warn!(
                    target: "bridge.sink",
                    destination = %self.destination,
                    "backlog full, oldest batch evicted"
                );
            }
            self.backlog.push_back(batch);
        }
        while let Some(batch) = self.backlog.pop_front() {
            match self.writer.write_batch(&self.destination, &batch).await {
                Ok(written) => {
                    record_flush_success();
                    debug!(
                        target: "bridge.sink",
                        destination = %self.destination,
                        written,
                        "batch flushed"
                    );
                }
                Err(err) => {
                    record_flush_failure();
                    warn!(
                        target: "bridge.sink",
                        destination = %self.destination,
                        error = %err,
                        pending = batch.len(),
                        "batch flush failed, retrying next cycle"
                    );
                    // 失败批次退回头部；其后批次本周期不再尝试，保持顺序
                    self.backlog.push_front(batch);
                    break;
                }
            }
        }
    }
}
