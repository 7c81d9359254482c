use thiserror::Error;

/// 统一错误类型
///
/// 所有单连接错误都只影响该连接本身，不会扩散到广播分发器或其他连接
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket 升级失败，连接从未进入 Active
    #[error("握手失败: {0}")]
    Handshake(String),

    /// 接收或解码失败
    #[error("读取错误: {0}")]
    Read(String),

    /// 向某个连接发送失败
    #[error("写入错误: connection={id}, {reason}")]
    Write { id: String, reason: String },

    /// 连接 ID 已被占用，拒绝覆盖
    #[error("连接 ID 冲突: {0}")]
    RegistrationConflict(String),

    /// 非法的生命周期状态转换
    #[error("非法状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// 创建写入错误
    pub fn write(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// 是否为连接 ID 冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::RegistrationConflict(_))
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, RelayError>;
