/// 白板事件信封定义
///
/// 文本帧统一为 `{"event": "...", "data": ...}`，`data` 部分对服务端不透明

use super::payload::{Payload, WireFrame};
use crate::errors::{RelayError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// 绘图事件
pub const EVENT_DRAWING: &str = "drawing";
/// 客户端心跳
pub const EVENT_PING: &str = "ping";
/// 心跳响应
pub const EVENT_PONG: &str = "pong";
/// 连接建立后下发的欢迎消息
pub const EVENT_WELCOME: &str = "welcome";

/// 入站信封（仅用于解码）
#[derive(Debug, Deserialize)]
struct IncomingEnvelope {
    event: String,
    /// 字段缺失为 None，显式的 `null` 也是合法负载
    #[serde(default, deserialize_with = "present")]
    data: Option<Box<RawValue>>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// 出站信封
#[derive(Serialize)]
struct OutgoingEnvelope<'a, T: Serialize + ?Sized> {
    event: &'a str,
    data: &'a T,
}

/// 客户端发来的事件
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// 需要转发给其他连接的绘图事件
    Drawing(Payload),
    /// 应用层心跳
    Ping,
    /// 未知事件，记录后忽略
    Unknown(String),
}

impl ClientEvent {
    /// 从文本帧解码
    pub fn from_text(text: &str) -> Result<Self> {
        let envelope: IncomingEnvelope = serde_json::from_str(text)
            .map_err(|e| RelayError::Read(format!("解析事件信封失败: {}", e)))?;

        match envelope.event.as_str() {
            EVENT_DRAWING => {
                let data = envelope
                    .data
                    .ok_or_else(|| RelayError::Read("drawing 事件缺少 data".to_string()))?;
                Ok(Self::Drawing(Payload::Json(data)))
            }
            EVENT_PING => Ok(Self::Ping),
            _ => Ok(Self::Unknown(envelope.event)),
        }
    }

    /// 从二进制帧解码，整帧作为绘图负载
    pub fn from_binary(data: Vec<u8>) -> Self {
        Self::Drawing(Payload::Binary(data))
    }

    /// 事件名
    pub fn name(&self) -> &str {
        match self {
            Self::Drawing(_) => EVENT_DRAWING,
            Self::Ping => EVENT_PING,
            Self::Unknown(name) => name,
        }
    }
}

/// 服务端下发的控制事件
pub struct ServerEvent;

impl ServerEvent {
    /// 把绘图负载编码为出站帧，`data` 原样写回
    pub fn drawing(payload: &Payload) -> Result<WireFrame> {
        match payload {
            Payload::Json(raw) => Ok(WireFrame::Text(encode(EVENT_DRAWING, &**raw)?)),
            Payload::Binary(bytes) => Ok(WireFrame::Binary(bytes.clone())),
        }
    }

    /// 欢迎消息，告知客户端自己的连接 ID
    pub fn welcome(connection_id: &str) -> Result<WireFrame> {
        let data = serde_json::json!({ "id": connection_id });
        Ok(WireFrame::Text(encode(EVENT_WELCOME, &data)?))
    }

    /// 心跳响应
    pub fn pong() -> Result<WireFrame> {
        let data = serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
        Ok(WireFrame::Text(encode(EVENT_PONG, &data)?))
    }
}

fn encode<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<String> {
    Ok(serde_json::to_string(&OutgoingEnvelope { event, data })?)
}
