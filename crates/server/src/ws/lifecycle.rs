/// 会话生命周期
///
/// Connecting -> Active -> Closing -> Closed，不允许回退。
/// 进入 Active 时注册，进入 Closed 时注销；握手或注册失败的会话
/// 直接从 Connecting 进入 Closed，不会触碰注册表。

use super::registry::{Connection, ConnectionRegistry, OutboundSender};
use common::{RelayError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    /// 是否允许转换到 `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单个连接的会话
pub struct Session {
    id: String,
    state: ConnectionState,
    registry: ConnectionRegistry,
    connection: Option<Arc<Connection>>,
}

impl Session {
    /// 新建会话，初始状态为 Connecting
    pub fn new(id: impl Into<String>, registry: ConnectionRegistry) -> Self {
        Self {
            id: id.into(),
            state: ConnectionState::Connecting,
            registry,
            connection: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("会话状态变更: {} {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Connecting -> Active，同时注册到注册表
    ///
    /// 注册冲突时会话直接进入 Closed，注册表中已有的连接不受影响
    pub async fn activate(&mut self, sender: OutboundSender) -> Result<Arc<Connection>> {
        if !self.state.can_transition_to(ConnectionState::Active) {
            return Err(RelayError::InvalidTransition {
                from: self.state.to_string(),
                to: ConnectionState::Active.to_string(),
            });
        }

        match self.registry.register(self.id.clone(), sender).await {
            Ok(connection) => {
                self.transition(ConnectionState::Active)?;
                self.connection = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                self.transition(ConnectionState::Closed)?;
                Err(e)
            }
        }
    }

    /// Active -> Closing
    pub fn begin_close(&mut self) -> Result<()> {
        self.transition(ConnectionState::Closing)?;
        if let Some(connection) = &self.connection {
            connection.close();
        }
        Ok(())
    }

    /// Closing/Connecting -> Closed，曾经 Active 的会话在此注销
    pub async fn finish_close(&mut self) -> Result<()> {
        let was_registered = self.state == ConnectionState::Closing;
        self.transition(ConnectionState::Closed)?;
        if was_registered {
            self.registry.unregister(&self.id).await;
        }
        self.connection = None;
        Ok(())
    }

    /// 从任意状态推进到 Closed，已关闭时为空操作
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Active {
            // Active -> Closing 总是合法
            let _ = self.begin_close();
        }
        if self.state != ConnectionState::Closed {
            let _ = self.finish_close().await;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
