/// Whiteboard Relay - Server
///
/// 协作白板中继服务：客户端通过 WebSocket 连接，
/// 任一客户端发出的绘图事件会被转发给其他所有在线客户端

mod api;
mod app_state;
mod config;
mod ws;

use axum::{routing::get, Router};
use common::utils::format_bytes;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use crate::{
    app_state::AppState,
    config::Config,
    ws::Hub,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = Config::from_env()?;

    // 初始化日志，RUST_LOG 优先于 LOG_LEVEL
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 Whiteboard Relay Server...");
    info!("✅ 配置加载成功");

    // 初始化 Hub
    let hub = Hub::new(cfg.hub_config());
    info!(
        "✅ 白板 Hub 初始化成功 (出站队列 {}, 丢帧上限 {}, 最大消息 {})",
        cfg.outbound_queue_capacity,
        cfg.max_dropped_frames,
        format_bytes(cfg.max_message_bytes as u64)
    );

    let app = build_router(AppState::new(hub), &cfg);

    // 启动服务器，监听失败直接退出
    let addr = cfg.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("❌ 无法监听 {}: {}", addr, e);
            return Err(anyhow::anyhow!("无法监听 {}: {}", addr, e));
        }
    };
    info!("🎯 服务器监听在 ws://{}{}", addr, cfg.ws_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("服务器已停止");
    Ok(())
}

/// 构建应用路由
fn build_router(app_state: AppState, cfg: &Config) -> Router {
    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route(&cfg.ws_path, get(ws::handle_canvas_websocket))
        .nest("/api", api::api_routes());

    // 配置了前端目录时由静态文件兜底，否则根路径返回版本信息
    app = match &cfg.static_dir {
        Some(dir) => {
            info!("📁 静态文件目录: {}", dir.display());
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        None => app.route("/", get(root_handler)),
    };

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，开始关闭...");
}

async fn root_handler() -> &'static str {
    "Whiteboard Relay Server v1"
}

async fn health_handler() -> &'static str {
    "OK"
}
