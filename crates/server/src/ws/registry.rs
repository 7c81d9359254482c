/// 连接注册表
///
/// 所有在线（Active）连接的唯一事实来源：connection_id -> Connection

use common::{RelayError, Result, WireFrame};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 出站队列发送端
pub type OutboundSender = mpsc::Sender<Arc<WireFrame>>;

/// 出站队列接收端，由该连接的传输适配器独占
pub type OutboundReceiver = mpsc::Receiver<Arc<WireFrame>>;

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 已进入出站队列
    Queued,
    /// 队列已满，本帧被丢弃；附带该连接累计丢帧数
    Dropped(u64),
    /// 队列已关闭（发送任务已结束）
    Closed,
}

/// 在线连接
#[derive(Debug)]
pub struct Connection {
    /// 连接 ID
    pub id: String,

    /// 出站队列
    sender: OutboundSender,

    /// 连接时间
    pub connected_at: chrono::DateTime<chrono::Utc>,

    /// 因队列满被丢弃的帧数
    dropped: AtomicU64,

    /// 关闭信号，触发后传输适配器结束读写循环
    close_signal: CancellationToken,
}

impl Connection {
    fn new(id: String, sender: OutboundSender) -> Self {
        Self {
            id,
            sender,
            connected_at: chrono::Utc::now(),
            dropped: AtomicU64::new(0),
            close_signal: CancellationToken::new(),
        }
    }

    /// 非阻塞投递一帧
    pub fn try_send(&self, frame: Arc<WireFrame>) -> SendOutcome {
        match self.sender.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                SendOutcome::Dropped(total)
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// 累计丢帧数
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 请求关闭该连接
    pub fn close(&self) {
        self.close_signal.cancel();
    }

    /// 是否已请求关闭
    pub fn is_closing(&self) -> bool {
        self.close_signal.is_cancelled()
    }

    /// 关闭信号
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }
}

/// 连接注册表
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<Connection>>>>,
}

impl ConnectionRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新连接
    ///
    /// ID 已存在时返回 `RegistrationConflict`，原有连接保持不变
    pub async fn register(&self, id: String, sender: OutboundSender) -> Result<Arc<Connection>> {
        let mut connections = self.connections.write().await;

        let connection = match connections.entry(id) {
            Entry::Occupied(entry) => {
                warn!("连接 ID 冲突，拒绝注册: {}", entry.key());
                return Err(RelayError::RegistrationConflict(entry.key().clone()));
            }
            Entry::Vacant(entry) => {
                let connection = Arc::new(Connection::new(entry.key().clone(), sender));
                entry.insert(connection.clone());
                connection
            }
        };

        info!("连接已注册: {} (在线 {})", connection.id, connections.len());
        Ok(connection)
    }

    /// 注销连接，ID 不存在时为空操作
    pub async fn unregister(&self, id: &str) -> bool {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            info!("连接已注销: {} (在线 {})", id, connections.len());
            true
        } else {
            debug!("注销不存在的连接，忽略: {}", id);
            false
        }
    }

    /// 获取某一时刻的连接快照，返回前即释放读锁
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    /// 获取指定连接
    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(id).cloned()
    }

    /// 在线连接数量
    pub async fn count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// 检查连接是否在线
    pub async fn contains(&self, id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(id)
    }

    /// 所有在线连接 ID（已排序）
    pub async fn ids(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut ids: Vec<String> = connections.keys().cloned().collect();
        ids.sort();
        ids
    }
}
