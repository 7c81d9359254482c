/// 白板协议模块
///
/// 定义客户端与中继服务之间的事件信封和帧格式

pub mod envelope;
pub mod payload;

pub use envelope::{ClientEvent, ServerEvent, EVENT_DRAWING, EVENT_PING, EVENT_PONG, EVENT_WELCOME};
pub use payload::{Payload, WireFrame};
