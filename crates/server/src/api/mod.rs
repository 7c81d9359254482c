/// HTTP 接口
///
/// 只读的运行状态查询，白板数据本身只走 WebSocket

pub mod stats;

use axum::{routing::get, Router};

use crate::app_state::AppState;

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats::get_stats))
        .route("/connections", get(stats::list_connections))
}
