/// 白板中继 Hub
///
/// 注册表 + 分发器 + 生命周期管理的组合，由 main 显式创建并放入应用状态

use super::dispatcher::{BroadcastReport, Dispatcher};
use super::lifecycle::Session;
use super::registry::{Connection, ConnectionRegistry, OutboundReceiver};
use async_trait::async_trait;
use common::{Payload, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hub 配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// 每个连接的出站队列容量
    pub outbound_queue_capacity: usize,
    /// 累计丢帧上限，0 表示不限制
    pub max_dropped_frames: u64,
    /// 读超时（秒），0 表示不限制
    pub read_timeout_secs: u64,
    /// 服务端 Ping 间隔（秒），0 表示不发送
    pub heartbeat_interval_secs: u64,
    /// 单条消息最大字节数
    pub max_message_bytes: usize,
    /// 单帧写超时（秒），0 表示不限制
    pub write_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_dropped_frames: 64,
            read_timeout_secs: 120,
            heartbeat_interval_secs: 30,
            max_message_bytes: 1024 * 1024,
            write_timeout_secs: 10,
        }
    }
}

/// 已激活的会话及其出站队列接收端
#[derive(Debug)]
pub struct ActiveSession {
    pub session: Session,
    pub connection: Arc<Connection>,
    pub outbound: OutboundReceiver,
}

/// 传输适配器对每个连接调用的会话处理接口
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// 握手成功后调用：注册连接并返回出站队列
    async fn handle_connect(&self, connection_id: String) -> Result<ActiveSession>;

    /// 收到绘图事件：转发给其他连接
    async fn handle_message(&self, origin_id: &str, payload: &Payload) -> Result<BroadcastReport>;

    /// 读写循环结束：关闭并注销
    async fn handle_disconnect(&self, session: &mut Session);
}

/// 白板中继 Hub
#[derive(Clone)]
pub struct Hub {
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    config: Arc<HubConfig>,
}

impl Hub {
    /// 创建新的 Hub
    pub fn new(config: HubConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone(), config.max_dropped_frames);
        Self {
            registry,
            dispatcher,
            config: Arc::new(config),
        }
    }

    /// 获取连接注册表
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 获取配置
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// 在线连接数量
    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[async_trait]
impl SessionHandler for Hub {
    async fn handle_connect(&self, connection_id: String) -> Result<ActiveSession> {
        let mut session = Session::new(connection_id, self.registry.clone());
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity.max(1));

        match session.activate(tx).await {
            Ok(connection) => {
                info!("会话已激活: {}", session.id());
                Ok(ActiveSession {
                    session,
                    connection,
                    outbound: rx,
                })
            }
            Err(e) => {
                warn!("会话激活失败: {}, error={}", session.id(), e);
                Err(e)
            }
        }
    }

    async fn handle_message(&self, origin_id: &str, payload: &Payload) -> Result<BroadcastReport> {
        self.dispatcher.broadcast(origin_id, payload).await
    }

    async fn handle_disconnect(&self, session: &mut Session) {
        let previous = session.state();
        session.close().await;
        info!("会话已关闭: {} ({} -> {})", session.id(), previous, session.state());
    }
}
