/// WebSocket 模块
///
/// 管理白板客户端的 WebSocket 连接、注册表与广播分发

pub mod dispatcher;
pub mod handler;
pub mod hub;
pub mod lifecycle;
pub mod registry;

pub use dispatcher::{BroadcastReport, Dispatcher};
pub use handler::handle_canvas_websocket;
pub use hub::{ActiveSession, Hub, HubConfig, SessionHandler};
pub use lifecycle::{ConnectionState, Session};
pub use registry::{Connection, ConnectionRegistry};
