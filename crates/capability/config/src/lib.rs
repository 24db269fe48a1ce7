//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub fallback_destination: String,
    pub flush_interval_ms: u64,
    pub queue_capacity: usize,
    pub backlog_capacity: usize,
    pub result_ttl_seconds: u64,
    pub command_channels: Vec<String>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("BRIDGE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("BRIDGE_DATABASE_URL".to_string()))?;
        let redis_url = env::var("BRIDGE_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let mqtt_host = env::var("BRIDGE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("BRIDGE_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("BRIDGE_MQTT_USERNAME");
        let mqtt_password = read_optional("BRIDGE_MQTT_PASSWORD");
        let fallback_destination =
            env::var("BRIDGE_FALLBACK_DESTINATION").unwrap_or_else(|_| "example".to_string());
        let flush_interval_ms = read_u64_with_default("BRIDGE_FLUSH_INTERVAL_MS", 500)?;
        let queue_capacity = read_usize_with_default("BRIDGE_QUEUE_CAPACITY", 10_240)?;
        let backlog_capacity = read_usize_with_default("BRIDGE_BACKLOG_CAPACITY", 1_024)?;
        let result_ttl_seconds = read_u64_with_default("BRIDGE_RESULT_TTL_SECONDS", 86_400)?;
        let command_channels = read_channels("BRIDGE_COMMAND_CHANNELS");

        Ok(Self {
            database_url,
            redis_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            fallback_destination,
            flush_interval_ms,
            queue_capacity,
            backlog_capacity,
            result_ttl_seconds,
            command_channels,
        })
    }
}

/// 命令总线默认订阅的通道。
const DEFAULT_COMMAND_CHANNELS: [&str; 4] =
    ["device_app", "device_sys", "device_output", "device_command"];

fn read_channels(key: &str) -> Vec<String> {
    let configured = match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            return DEFAULT_COMMAND_CHANNELS
                .iter()
                .map(|channel| channel.to_string())
                .collect();
        }
    };
    configured
        .split(',')
        .map(str::trim)
        .filter(|channel| !channel.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
