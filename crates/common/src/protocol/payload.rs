/// 绘图负载与出站帧

use serde_json::value::RawValue;

/// 不透明的绘图负载
///
/// 服务端不解析其内部结构，只负责原样转发
#[derive(Debug, Clone)]
pub enum Payload {
    /// 文本信封中 `data` 字段的原始 JSON
    Json(Box<RawValue>),
    /// 二进制帧的全部字节
    Binary(Vec<u8>),
}

impl Payload {
    /// 负载字节数
    pub fn len(&self) -> usize {
        match self {
            Self::Json(raw) => raw.get().len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }
}

/// 编码完成、可直接写入连接的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFrame {
    /// 帧字节数
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }
}
