/// 连接统计接口

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app_state::AppState;

/// 统计信息
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: usize,
}

/// 单个连接信息
#[derive(Debug, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub dropped_frames: u64,
}

/// 获取在线连接数
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.hub().connection_count().await,
    })
}

/// 列出在线连接
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    let mut connections: Vec<ConnectionInfo> = state
        .hub()
        .registry()
        .snapshot()
        .await
        .iter()
        .map(|conn| ConnectionInfo {
            id: conn.id.clone(),
            connected_at: conn.connected_at,
            dropped_frames: conn.dropped_frames(),
        })
        .collect();
    connections.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.id.cmp(&b.id)));

    Json(connections)
}
