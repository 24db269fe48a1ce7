//! 入站主题分发。
//!
//! 每条 broker 消息按主题形态分类：`<device_id>/data`、
//! `<device_id>/devices`、`<device_id>/status`，其余忽略。畸形主题或
//! 报文在此边界丢弃并计数，分发循环自身永不崩溃。

use async_trait::async_trait;
use bridge_ingest::{InboundMessage, IngestError, MessageHandler};
use bridge_normalize::{TypeHintTable, stringify};
use bridge_routing::DeviceRegistry;
use bridge_telemetry::record_parse_error;
use domain::{Reading, ScalarValue};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// 主题分发器。
///
/// 消息之间无状态；跨消息状态只存在于注册表与类型提示表中。
pub struct Dispatcher {
    registry: DeviceRegistry,
    hints: Arc<TypeHintTable>,
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError> {
        self.dispatch(message).await;
        Ok(())
    }
}

impl Dispatcher {
    pub fn new(registry: DeviceRegistry, hints: Arc<TypeHintTable>) -> Self {
        Self { registry, hints }
    }

    /// 处理一条入站消息；所有错误都被吸收在消息边界内。
    pub async fn dispatch(&self, message: InboundMessage) {
        let Some((iot, kind)) = message.topic.split_once('/') else {
            record_parse_error();
            debug!(target: "bridge.dispatch", topic = %message.topic, "unmatched topic dropped");
            return;
        };
        if iot.is_empty() {
            record_parse_error();
            debug!(target: "bridge.dispatch", topic = %message.topic, "unmatched topic dropped");
            return;
        }
        match kind {
            "data" => self.handle_data(iot, &message).await,
            "devices" => self.handle_devices(iot, &message).await,
            "status" => self.handle_status(iot, &message).await,
            other => {
                debug!(target: "bridge.dispatch", iot, kind = other, "unhandled topic kind");
            }
        }
    }

    /// `data`：`[path, timestamp, value, quality]`，path 形如
    /// `<device>/<input>/<property>`。
    async fn handle_data(&self, iot: &str, message: &InboundMessage) {
        // 保留消息是 broker 缓存的旧值，重新入库会重复计数
        if message.retained {
            debug!(target: "bridge.dispatch", iot, "retained data ignored");
            return;
        }
        let payload: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(err) => {
                record_parse_error();
                debug!(target: "bridge.dispatch", iot, error = %err, "bad data payload");
                return;
            }
        };
        let fields = payload.as_array();
        let parsed = fields.and_then(|fields| {
            let path = fields.first()?.as_str()?;
            let (device, input, prop) = split_data_path(path)?;
            let ts = fields.get(1)?.as_f64()?;
            let raw = fields.get(2)?;
            let quality = fields.get(3)?.as_i64()?;
            Some((device, input, prop, ts, raw, quality as i32))
        });
        let Some((device, input, prop, ts, raw, quality)) = parsed else {
            record_parse_error();
            debug!(target: "bridge.dispatch", iot, "bad data payload");
            return;
        };

        let worker = match self.registry.resolve(iot).await {
            Ok(worker) => worker,
            Err(err) => {
                warn!(target: "bridge.dispatch", iot, error = %err, "device resolution failed");
                return;
            }
        };

        let (property, value) = if prop == "value" {
            let (tag, value) = self.hints.coerce(iot, device, input, raw);
            let property = match tag {
                Some(tag) => format!("{}_{}", tag, prop),
                None => prop.to_string(),
            };
            (property, value)
        } else {
            (prop.to_string(), ScalarValue::String(stringify(raw)))
        };

        worker.append(Reading {
            name: input.to_string(),
            property,
            device: device.to_string(),
            iot: iot.to_string(),
            ts,
            value,
            quality,
        });
    }

    /// `devices`：设备描述文档。先入一条配置快照读数，再重建该设备的
    /// 类型提示条目。
    async fn handle_devices(&self, iot: &str, message: &InboundMessage) {
        let cfg: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(err) => {
                record_parse_error();
                debug!(target: "bridge.dispatch", iot, error = %err, "bad devices payload");
                return;
            }
        };
        let worker = match self.registry.resolve(iot).await {
            Ok(worker) => worker,
            Err(err) => {
                warn!(target: "bridge.dispatch", iot, error = %err, "device resolution failed");
                return;
            }
        };
        let text = String::from_utf8_lossy(&message.payload).into_owned();
        worker.append(Reading {
            name: "iot_device".to_string(),
            property: "cfg".to_string(),
            device: iot.to_string(),
            iot: iot.to_string(),
            ts: now_epoch_secs(),
            value: ScalarValue::String(text),
            quality: 0,
        });
        self.hints.learn(iot, &cfg);
        info!(target: "bridge.dispatch", iot, "device description applied");
    }

    /// `status`：裸令牌，仅 ONLINE/OFFLINE 有意义。
    async fn handle_status(&self, iot: &str, message: &InboundMessage) {
        let token = match std::str::from_utf8(&message.payload) {
            Ok(token) => token,
            Err(err) => {
                record_parse_error();
                debug!(target: "bridge.dispatch", iot, error = %err, "bad status payload");
                return;
            }
        };
        let online = match token {
            "ONLINE" => true,
            "OFFLINE" => false,
            _ => return,
        };
        let worker = match self.registry.resolve(iot).await {
            Ok(worker) => worker,
            Err(err) => {
                warn!(target: "bridge.dispatch", iot, error = %err, "device resolution failed");
                return;
            }
        };
        worker.append(Reading {
            name: "device_status".to_string(),
            property: "online".to_string(),
            device: iot.to_string(),
            iot: iot.to_string(),
            ts: now_epoch_secs(),
            value: ScalarValue::Bool(online),
            quality: 0,
        });
    }
}

/// 拆分数据路径 `<device>/<input>/<property>`；property 可含斜杠。
fn split_data_path(path: &str) -> Option<(&str, &str, &str)> {
    let (device, rest) = path.split_once('/')?;
    let (input, prop) = rest.split_once('/')?;
    if device.is_empty() || input.is_empty() || prop.is_empty() {
        return None;
    }
    Some((device, input, prop))
}

fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
