//! 桥接守护进程入口。
//!
//! 装配三条长驻链路：broker 遥测接入 → 分发 → 写后队列，命令总线 →
//! broker 命令转发，broker → 命令总线结果回传。任何一条链路退出都说明
//! 监听器已死，按致命错误升级为进程退出，交给进程监控重启。

use bridge_config::AppConfig;
use bridge_dispatch::Dispatcher;
use bridge_ingest::{MqttListener, MqttListenerConfig};
use bridge_normalize::TypeHintTable;
use bridge_relay::{Relay, RelayConfig};
use bridge_routing::{DeviceRegistry, WorkerSet};
use bridge_sink::SinkConfig;
use bridge_storage::{PgMeasurementWriter, RedisResultCache, RedisRoutingLookup};
use bridge_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 时序存储与 Redis 侧外部接口
    let writer = Arc::new(PgMeasurementWriter::connect(&config.database_url).await?);
    let lookup = Arc::new(RedisRoutingLookup::connect(&config.redis_url)?);
    let cache = Arc::new(RedisResultCache::connect(&config.redis_url)?);

    // 设备路由注册表 + 每目标库写后队列
    let sink_config = SinkConfig {
        queue_capacity: config.queue_capacity,
        backlog_capacity: config.backlog_capacity,
        flush_interval: Duration::from_millis(config.flush_interval_ms),
    };
    let workers = WorkerSet::new(writer, sink_config);
    let registry = DeviceRegistry::new(lookup, config.fallback_destination.clone(), workers);

    // 主题分发器（接入处理器）
    let hints = Arc::new(TypeHintTable::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, hints));

    // 遥测接入循环
    let listener = MqttListener::new(MqttListenerConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
    });
    let ingest_task = tokio::spawn(async move { listener.run(dispatcher).await });

    // 命令/结果中继：两个循环共享一个 MQTT 客户端
    let (relay, eventloop) = Relay::connect(
        RelayConfig {
            mqtt_host: config.mqtt_host.clone(),
            mqtt_port: config.mqtt_port,
            mqtt_username: config.mqtt_username.clone(),
            mqtt_password: config.mqtt_password.clone(),
            redis_url: config.redis_url.clone(),
            channels: config.command_channels.clone(),
            result_ttl_seconds: config.result_ttl_seconds,
        },
        cache,
    )?;
    let relay = Arc::new(relay);
    let command_relay = relay.clone();
    let command_task = tokio::spawn(async move { command_relay.run_command_loop().await });
    let result_task = tokio::spawn(async move { relay.run_result_loop(eventloop).await });

    // 任何循环退出都升级为进程退出
    tokio::select! {
        outcome = ingest_task => report_exit("ingest", outcome),
        outcome = command_task => report_exit("relay command", outcome),
        outcome = result_task => report_exit("relay result", outcome),
    }
    std::process::exit(1);
}

fn report_exit<E: std::fmt::Display>(
    task: &str,
    outcome: Result<Result<(), E>, tokio::task::JoinError>,
) {
    match outcome {
        Ok(Ok(())) => error!(target: "bridged", task, "loop exited unexpectedly"),
        Ok(Err(err)) => error!(target: "bridged", task, error = %err, "loop failed"),
        Err(err) => error!(target: "bridged", task, error = %err, "loop panicked"),
    }
}
