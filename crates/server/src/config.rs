/// 配置管理

use crate::ws::HubConfig;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// WebSocket 路径
    pub ws_path: String,
    pub log_level: String,
    /// 每个连接的出站队列容量
    pub outbound_queue_capacity: usize,
    /// 累计丢帧达到该值后断开慢连接
    pub max_dropped_frames: u64,
    /// 读超时（秒），0 表示不限制
    pub read_timeout_secs: u64,
    /// 服务端 Ping 间隔（秒），0 表示不发送
    pub heartbeat_interval_secs: u64,
    /// 单条消息最大字节数
    pub max_message_bytes: usize,
    /// 单帧写超时（秒），0 表示不限制
    pub write_timeout_secs: u64,
    /// 前端静态文件目录（可选）
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let server_host = std::env::var("SERVER_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env_or("SERVER_PORT", 8000)?;

        let ws_path = std::env::var("WS_PATH")
            .unwrap_or_else(|_| "/ws".to_string());
        if !ws_path.starts_with('/') {
            anyhow::bail!("WS_PATH 必须以 / 开头: {}", ws_path);
        }

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "debug".to_string());

        let outbound_queue_capacity = env_or("OUTBOUND_QUEUE_CAPACITY", 256)?;
        if outbound_queue_capacity == 0 {
            anyhow::bail!("OUTBOUND_QUEUE_CAPACITY 必须大于 0");
        }

        let max_dropped_frames = env_or("MAX_DROPPED_FRAMES", 64)?;
        let read_timeout_secs = env_or("READ_TIMEOUT_SECS", 120)?;
        let heartbeat_interval_secs = env_or("HEARTBEAT_INTERVAL_SECS", 30)?;
        let max_message_bytes = env_or("MAX_MESSAGE_BYTES", 1024 * 1024)?;
        let write_timeout_secs = env_or("WRITE_TIMEOUT_SECS", 10)?;

        let static_dir = std::env::var("STATIC_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            server_host,
            server_port,
            ws_path,
            log_level,
            outbound_queue_capacity,
            max_dropped_frames,
            read_timeout_secs,
            heartbeat_interval_secs,
            max_message_bytes,
            write_timeout_secs,
            static_dir,
        })
    }

    /// Hub 需要的配置子集
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            max_dropped_frames: self.max_dropped_frames,
            read_timeout_secs: self.read_timeout_secs,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            max_message_bytes: self.max_message_bytes,
            write_timeout_secs: self.write_timeout_secs,
        }
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("环境变量 {} 无效: {}", key, e)),
        Err(_) => Ok(default),
    }
}
