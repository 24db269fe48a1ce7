//! MQTT 遥测接入。
//!
//! 订阅设备遥测主题并把收到的消息逐条交给处理器。断线重连由事件循环
//! 驱动，每次 CONNACK 后重新订阅，轮询失败按指数退避。

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SUBSCRIPTIONS: [&str; 3] = ["+/data", "+/devices", "+/status"];

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("source error: {0}")]
    Source(String),
    #[error("handler error: {0}")]
    Handler(String),
}

/// 一条入站 broker 消息。
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// broker 缓存的保留消息标记；保留的 `data` 不是新事件。
    pub retained: bool,
}

/// 入站消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError>;
}

/// MQTT 接入配置。
#[derive(Debug, Clone)]
pub struct MqttListenerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// MQTT 遥测监听器。
pub struct MqttListener {
    config: MqttListenerConfig,
}

impl MqttListener {
    pub fn new(config: MqttListenerConfig) -> Self {
        Self { config }
    }

    /// 运行监听循环；只在消息处理永远无法继续时返回。
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        let client_id = format!("bridge-ingest-{}", uuid::Uuid::new_v4());
        let mut options =
            MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = BACKOFF_INITIAL;
                    for topic in SUBSCRIPTIONS {
                        client
                            .subscribe(topic, QoS::AtMostOnce)
                            .await
                            .map_err(|err| IngestError::Source(err.to_string()))?;
                    }
                    info!(target: "bridge.ingest", "connected, telemetry topics subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        retained: publish.retain,
                    };
                    if let Err(err) = handler.handle(message).await {
                        warn!(
                            target: "bridge.ingest",
                            topic = %publish.topic,
                            error = %err,
                            "message handler failed"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        target: "bridge.ingest",
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
}
