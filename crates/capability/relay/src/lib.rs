//! 命令/结果中继。
//!
//! 两个独立循环共享一个 MQTT 客户端句柄：命令循环把命令总线通道上的
//! 报文改写主题后发往 broker；结果循环把 `+/result/#` 上的结果报文改写
//! 通道后发回命令总线，并按关联 id 缓存 24 小时供点查。传输层故障退避
//! 重连；客户端句柄失效视为致命错误，交由进程层面升级处理。

use bridge_storage::ResultCache;
use bridge_telemetry::{
    record_command_forwarded, record_parse_error, record_relay_error, record_result_cached,
    record_result_forwarded,
};
use futures_util::StreamExt;
use redis::AsyncCommands;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// 中继错误。
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("message error: {0}")]
    Parse(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// 中继配置。
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub redis_url: String,
    pub channels: Vec<String>,
    pub result_ttl_seconds: u64,
}

/// 改写后的待发 broker 消息。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPublish {
    pub topic: String,
    pub payload: String,
}

/// 改写后的待发命令总线消息。
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPublish {
    pub channel: String,
    pub body: String,
    pub correlation_id: Option<String>,
}

/// 把通道消息改写为 broker 发布。
///
/// 目标主题为 `<device>/<去掉 device_ 前缀的通道名>`；`topic` 字段追加为
/// 额外一段并从报文中移除；`payload` 字段存在时原样作为消息体，否则发
/// 整个剩余文档的 JSON。
pub fn prepare_command(channel: &str, body: &str) -> Result<CommandPublish, RelayError> {
    let mut request: serde_json::Value =
        serde_json::from_str(body).map_err(|err| RelayError::Parse(err.to_string()))?;
    let Some(object) = request.as_object_mut() else {
        return Err(RelayError::Parse("command body is not an object".to_string()));
    };
    let device = object
        .get("device")
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RelayError::Parse("command without device".to_string()))?
        .to_string();

    let suffix = channel.strip_prefix("device_").unwrap_or(channel);
    let mut topic = format!("{}/{}", device, suffix);
    let extra = object
        .get("topic")
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if let Some(extra) = extra {
        topic.push('/');
        topic.push_str(&extra);
        object.remove("topic");
    }

    let payload_field = object.get("payload").cloned();
    let payload = match payload_field {
        Some(serde_json::Value::String(text)) => text,
        Some(serde_json::Value::Null) | None => request.to_string(),
        Some(other) => other.to_string(),
    };
    Ok(CommandPublish { topic, payload })
}

/// 把 broker 结果改写为命令总线发布。
///
/// 报文缺少 `device` 字段时从主题补齐；携带 `id` 时返回关联 id 供缓存。
pub fn prepare_result(device: &str, action: &str, body: &str) -> Result<ResultPublish, RelayError> {
    let mut result: serde_json::Value =
        serde_json::from_str(body).map_err(|err| RelayError::Parse(err.to_string()))?;
    let Some(object) = result.as_object_mut() else {
        return Err(RelayError::Parse("result body is not an object".to_string()));
    };
    if !object.contains_key("device") {
        object.insert(
            "device".to_string(),
            serde_json::Value::String(device.to_string()),
        );
    }
    let correlation_id = match object.get("id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    Ok(ResultPublish {
        channel: format!("device_{}_result", action),
        body: result.to_string(),
        correlation_id,
    })
}

/// 解析结果主题 `<device>/result/<action>`；多余的段忽略。
pub fn parse_result_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.split('/');
    let device = parts.next().filter(|part| !part.is_empty())?;
    if parts.next()? != "result" {
        return None;
    }
    let action = parts.next().filter(|part| !part.is_empty())?;
    Some((device, action))
}

/// 命令总线 ↔ broker 中继。
pub struct Relay {
    mqtt: AsyncClient,
    redis: redis::Client,
    cache: Arc<dyn ResultCache>,
    config: RelayConfig,
}

impl Relay {
    /// 构造 MQTT 客户端与 Redis 客户端；事件循环交给结果循环驱动。
    pub fn connect(
        config: RelayConfig,
        cache: Arc<dyn ResultCache>,
    ) -> Result<(Self, EventLoop), RelayError> {
        let client_id = format!("bridge-relay-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (config.mqtt_username.as_ref(), config.mqtt_password.as_ref())
        {
            options.set_credentials(username, password);
        }
        let (mqtt, eventloop) = AsyncClient::new(options, 64);
        let redis = redis::Client::open(config.redis_url.as_str())
            .map_err(|err| RelayError::Transport(err.to_string()))?;
        Ok((
            Self {
                mqtt,
                redis,
                cache,
                config,
            },
            eventloop,
        ))
    }

    /// 命令循环：订阅命令总线通道并逐条转发到 broker。
    pub async fn run_command_loop(&self) -> Result<(), RelayError> {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match self.redis.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    let mut subscribed = true;
                    for channel in &self.config.channels {
                        if let Err(err) = pubsub.subscribe(channel).await {
                            warn!(
                                target: "bridge.relay",
                                channel = %channel,
                                error = %err,
                                "channel subscribe failed"
                            );
                            subscribed = false;
                            break;
                        }
                    }
                    if subscribed {
                        info!(
                            target: "bridge.relay",
                            channels = ?self.config.channels,
                            "command channels subscribed"
                        );
                        backoff = BACKOFF_INITIAL;
                        let mut messages = pubsub.on_message();
                        while let Some(message) = messages.next().await {
                            self.forward_command(&message).await?;
                        }
                        warn!(target: "bridge.relay", "command channel stream ended");
                    }
                }
                Err(err) => {
                    warn!(target: "bridge.relay", error = %err, "command bus connect failed");
                }
            }
            record_relay_error();
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    async fn forward_command(&self, message: &redis::Msg) -> Result<(), RelayError> {
        let channel = message.get_channel_name().to_string();
        let body: String = match message.get_payload() {
            Ok(body) => body,
            Err(err) => {
                record_parse_error();
                debug!(target: "bridge.relay", channel = %channel, error = %err, "unreadable command message");
                return Ok(());
            }
        };
        match prepare_command(&channel, &body) {
            Ok(command) => {
                debug!(
                    target: "bridge.relay",
                    channel = %channel,
                    topic = %command.topic,
                    "command forwarded"
                );
                self.mqtt
                    .publish(command.topic, QoS::AtLeastOnce, false, command.payload)
                    .await
                    .map_err(|err| RelayError::Fatal(err.to_string()))?;
                record_command_forwarded();
            }
            Err(err) => {
                record_parse_error();
                debug!(
                    target: "bridge.relay",
                    channel = %channel,
                    error = %err,
                    "command message dropped"
                );
            }
        }
        Ok(())
    }

    /// 结果循环：驱动共享事件循环，订阅 `+/result/#` 并转发结果。
    pub async fn run_result_loop(&self, mut eventloop: EventLoop) -> Result<(), RelayError> {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = BACKOFF_INITIAL;
                    self.mqtt
                        .subscribe("+/result/#", QoS::AtLeastOnce)
                        .await
                        .map_err(|err| RelayError::Fatal(err.to_string()))?;
                    info!(target: "bridge.relay", "connected, result topic subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.forward_result(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(err) => {
                    record_relay_error();
                    warn!(
                        target: "bridge.relay",
                        error = %err,
                        retry_in_secs = backoff.as_secs(),
                        "mqtt connection error"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    async fn forward_result(&self, topic: &str, payload: &[u8]) {
        let Some((device, action)) = parse_result_topic(topic) else {
            record_parse_error();
            debug!(target: "bridge.relay", topic = %topic, "unmatched result topic");
            return;
        };
        let body = String::from_utf8_lossy(payload);
        let result = match prepare_result(device, action, &body) {
            Ok(result) => result,
            Err(err) => {
                record_parse_error();
                debug!(target: "bridge.relay", topic = %topic, error = %err, "result message dropped");
                return;
            }
        };

        let mut connection = match self.redis.get_multiplexed_tokio_connection().await {
            Ok(connection) => connection,
            Err(err) => {
                record_relay_error();
                warn!(target: "bridge.relay", error = %err, "command bus connect failed");
                return;
            }
        };
        match connection
            .publish::<_, _, i64>(&result.channel, &result.body)
            .await
        {
            Ok(_) => {
                record_result_forwarded();
                debug!(
                    target: "bridge.relay",
                    topic = %topic,
                    channel = %result.channel,
                    "result forwarded"
                );
            }
            Err(err) => {
                record_relay_error();
                warn!(target: "bridge.relay", error = %err, "result publish failed");
            }
        }

        if let Some(id) = result.correlation_id {
            match self
                .cache
                .store(&id, &result.body, self.config.result_ttl_seconds)
                .await
            {
                Ok(()) => record_result_cached(),
                Err(err) => {
                    warn!(
                        target: "bridge.relay",
                        correlation_id = %id,
                        error = %err,
                        "result cache write failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topic_strips_channel_prefix() {
        let command = prepare_command("device_command", r#"{"device":"dev1","op":"restart"}"#)
            .expect("command");
        assert_eq!(command.topic, "dev1/command");
        assert_eq!(command.payload, r#"{"device":"dev1","op":"restart"}"#);
    }

    #[test]
    fn command_topic_field_appends_segment_and_is_stripped() {
        let command =
            prepare_command("device_command", r#"{"device":"dev1","topic":"reset"}"#)
                .expect("command");
        assert_eq!(command.topic, "dev1/command/reset");
        assert_eq!(command.payload, r#"{"device":"dev1"}"#);
    }

    #[test]
    fn command_payload_field_passes_through() {
        let command = prepare_command(
            "device_output",
            r#"{"device":"dev1","payload":"raw-bytes"}"#,
        )
        .expect("command");
        assert_eq!(command.topic, "dev1/output");
        assert_eq!(command.payload, "raw-bytes");

        let command = prepare_command(
            "device_output",
            r#"{"device":"dev1","payload":{"k":1}}"#,
        )
        .expect("command");
        assert_eq!(command.payload, r#"{"k":1}"#);
    }

    #[test]
    fn command_without_device_is_rejected() {
        prepare_command("device_command", r#"{"op":"restart"}"#).expect_err("no device");
        prepare_command("device_command", "[1,2]").expect_err("not an object");
        prepare_command("device_command", "not json").expect_err("bad json");
    }

    #[test]
    fn result_topic_parses_device_and_action() {
        assert_eq!(parse_result_topic("dev1/result/output"), Some(("dev1", "output")));
        assert_eq!(parse_result_topic("dev1/result/output/extra"), Some(("dev1", "output")));
        assert_eq!(parse_result_topic("dev1/data"), None);
        assert_eq!(parse_result_topic("dev1/result"), None);
    }

    #[test]
    fn result_injects_device_only_when_absent() {
        let result = prepare_result("dev1", "output", r#"{"ok":true}"#).expect("result");
        assert_eq!(result.channel, "device_output_result");
        let body: serde_json::Value = serde_json::from_str(&result.body).expect("json");
        assert_eq!(body["device"], "dev1");

        let result =
            prepare_result("dev1", "output", r#"{"ok":true,"device":"other"}"#).expect("result");
        let body: serde_json::Value = serde_json::from_str(&result.body).expect("json");
        assert_eq!(body["device"], "other");
    }

    #[test]
    fn result_correlation_id_is_extracted() {
        let result =
            prepare_result("dev1", "command", r#"{"id":"req-9","ok":true}"#).expect("result");
        assert_eq!(result.correlation_id.as_deref(), Some("req-9"));

        let result = prepare_result("dev1", "command", r#"{"ok":true}"#).expect("result");
        assert_eq!(result.correlation_id, None);
    }
}
