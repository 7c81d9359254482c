/// 白板 WebSocket 连接处理器
///
/// 每个连接一个读任务和一个写任务：读任务解码入站帧并交给 Hub 分发，
/// 写任务独占 socket 的发送端，逐帧写出出站队列中的数据。

use super::hub::{ActiveSession, Hub, SessionHandler};
use super::registry::{Connection, OutboundReceiver, SendOutcome};
use crate::app_state::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message as AxumWsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use common::utils::generate_connection_id;
use common::{ClientEvent, RelayError, Result, ServerEvent, WireFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 读任务结束后等待写任务发出关闭帧的时间
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// 被驱逐的连接留给写任务发出关闭帧的时间
const EVICT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket 升级处理器
pub async fn handle_canvas_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.hub();
    ws.max_message_size(hub.config().max_message_bytes)
        .on_failed_upgrade(|e: axum::Error| {
            let err = RelayError::Handshake(e.to_string());
            warn!("WebSocket 升级失败: {}", err);
        })
        .on_upgrade(move |socket| handle_canvas_connection(socket, hub))
}

/// 处理单个白板连接
async fn handle_canvas_connection(socket: WebSocket, hub: Hub) {
    let connection_id = generate_connection_id();
    info!("新的白板 WebSocket 连接: {}", connection_id);

    let (mut ws_sender, ws_receiver) = socket.split();

    // Connecting -> Active
    let ActiveSession {
        mut session,
        connection,
        outbound,
    } = match hub.handle_connect(connection_id.clone()).await {
        Ok(active) => active,
        Err(e) => {
            error!("连接注册失败: {}, error={}", connection_id, e);
            let _ = ws_sender
                .send(AxumWsMessage::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "registration rejected".into(),
                })))
                .await;
            return;
        }
    };

    // 告知客户端自己的连接 ID
    match ServerEvent::welcome(&connection_id) {
        Ok(frame) => {
            connection.try_send(Arc::new(frame));
        }
        Err(e) => warn!("编码欢迎消息失败: {}", e),
    }

    let config = hub.config().clone();
    let heartbeat = seconds(config.heartbeat_interval_secs);
    let read_timeout = seconds(config.read_timeout_secs);
    let write_timeout = seconds(config.write_timeout_secs);

    // 分发器驱逐慢连接时会触发关闭信号
    let evicted = connection.close_signal();

    // 创建消息发送任务
    let close_signal = connection.close_signal();
    let send_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        let deadline = WriteDeadline {
            limit: write_timeout,
            connection_id: &send_id,
        };
        if let Err(e) = write_loop(ws_sender, outbound, close_signal, heartbeat, deadline).await {
            warn!("连接 {} 发送失败: {}", send_id, e);
        }
        debug!("消息发送任务结束: {}", send_id);
    });

    // 创建消息接收任务
    let recv_hub = hub.clone();
    let recv_connection = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        if let Err(e) = read_loop(ws_receiver, &recv_hub, &recv_connection, read_timeout).await {
            warn!("连接 {} 接收失败: {}", recv_connection.id, e);
        }
        debug!("消息接收任务结束: {}", recv_connection.id);
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut recv_task => {
            // Active -> Closing，触发关闭信号让写任务发出关闭帧
            let _ = session.begin_close();
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = evicted.cancelled() => {
            // 写任务可能阻塞在写满的 socket 上，不再等待读写循环自行结束
            info!("连接 {} 被驱逐，立即断开", connection_id);
            recv_task.abort();
            if tokio::time::timeout(EVICT_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    // 清理：Closing -> Closed 并从注册表注销
    hub.handle_disconnect(&mut session).await;
    info!("白板连接已关闭: {}", connection_id);
}

/// 读循环：阻塞等待入站帧，解码后交给会话处理器
async fn read_loop<H: SessionHandler>(
    mut receiver: SplitStream<WebSocket>,
    handler: &H,
    connection: &Connection,
    read_timeout: Option<Duration>,
) -> Result<()> {
    loop {
        let next = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, receiver.next())
                .await
                .map_err(|_| RelayError::Read(format!("{} 秒内未收到任何帧", limit.as_secs())))?,
            None => receiver.next().await,
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(RelayError::Read(e.to_string())),
            None => {
                debug!("连接 {} 数据流结束", connection.id);
                return Ok(());
            }
        };

        if !handle_incoming_message(msg, handler, connection).await? {
            return Ok(());
        }
    }
}

/// 处理一条入站帧，返回 false 表示对端主动关闭
async fn handle_incoming_message<H: SessionHandler>(
    ws_msg: AxumWsMessage,
    handler: &H,
    connection: &Connection,
) -> Result<bool> {
    let event = match ws_msg {
        AxumWsMessage::Text(text) => ClientEvent::from_text(&text)?,
        AxumWsMessage::Binary(data) => ClientEvent::from_binary(data),
        AxumWsMessage::Ping(_) | AxumWsMessage::Pong(_) => return Ok(true),
        AxumWsMessage::Close(frame) => {
            debug!("连接 {} 请求关闭: {:?}", connection.id, frame);
            return Ok(false);
        }
    };
    debug!("收到 {} 事件: {}", event.name(), connection.id);

    match event {
        ClientEvent::Drawing(payload) => {
            let report = handler.handle_message(&connection.id, &payload).await?;
            if report.targets == 0 {
                debug!("没有其他在线连接，丢弃 {} 字节绘图负载", payload.len());
            }
        }
        ClientEvent::Ping => {
            let pong = Arc::new(ServerEvent::pong()?);
            if connection.try_send(pong) != SendOutcome::Queued {
                warn!("发送心跳响应失败: {}", connection.id);
            }
        }
        ClientEvent::Unknown(name) => {
            debug!("收到未知的白板事件类型: {}, connection={}", name, connection.id);
        }
    }

    Ok(true)
}

/// 单帧写超时，超时视为写失败
struct WriteDeadline<'a> {
    limit: Option<Duration>,
    connection_id: &'a str,
}

impl WriteDeadline<'_> {
    async fn send(
        &self,
        sender: &mut SplitSink<WebSocket, AxumWsMessage>,
        msg: AxumWsMessage,
    ) -> Result<()> {
        let sent = match self.limit {
            Some(limit) => tokio::time::timeout(limit, sender.send(msg))
                .await
                .map_err(|_| {
                    RelayError::write(
                        self.connection_id,
                        format!("{} 秒内未能写出一帧", limit.as_secs()),
                    )
                })?,
            None => sender.send(msg).await,
        };
        sent.map_err(|e| RelayError::write(self.connection_id, e.to_string()))
    }
}

/// 写循环：独占发送端，保证每一帧完整写出
async fn write_loop(
    mut sender: SplitSink<WebSocket, AxumWsMessage>,
    mut outbound: OutboundReceiver,
    close_signal: CancellationToken,
    heartbeat: Option<Duration>,
    deadline: WriteDeadline<'_>,
) -> Result<()> {
    let mut ticker = heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;

            _ = close_signal.cancelled() => {
                // 对端可能已经关闭，忽略错误
                let close = AxumWsMessage::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "".into(),
                }));
                let _ = deadline.send(&mut sender, close).await;
                return Ok(());
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                deadline.send(&mut sender, to_ws_message(&frame)).await?;
            }
            _ = next_tick(&mut ticker) => {
                deadline.send(&mut sender, AxumWsMessage::Ping(Vec::new())).await?;
            }
        }
    }
}

fn to_ws_message(frame: &WireFrame) -> AxumWsMessage {
    match frame {
        WireFrame::Text(text) => AxumWsMessage::Text(text.clone()),
        WireFrame::Binary(bytes) => AxumWsMessage::Binary(bytes.clone()),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::HubConfig;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(config: HubConfig) -> (SocketAddr, Hub) {
        let hub = Hub::new(config);
        let app = Router::new()
            .route("/ws", get(handle_canvas_websocket))
            .with_state(AppState::new(hub.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hub)
    }

    /// 连接并读取欢迎消息，返回客户端和服务端分配的 ID
    async fn connect(addr: SocketAddr) -> (Client, String) {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let welcome = next_text(&mut ws).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&welcome).unwrap();
        assert_eq!(value["event"], "welcome");
        let id = value["data"]["id"].as_str().unwrap().to_string();
        (ws, id)
    }

    /// 读取下一条文本帧，跳过控制帧；连接关闭时返回 None
    async fn next_text(ws: &mut Client) -> Option<String> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("等待消息超时")?;
            match msg {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    async fn expect_silence(ws: &mut Client) {
        let res = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
        assert!(res.is_err(), "不应收到消息: {:?}", res);
    }

    async fn wait_for_count(hub: &Hub, expected: usize) {
        for _ in 0..500 {
            if hub.connection_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("在线连接数未达到 {}", expected);
    }

    fn drawing(data: &str) -> String {
        format!(r#"{{"event":"drawing","data":{}}}"#, data)
    }

    #[tokio::test]
    async fn test_relay_scenario() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut a, id_a) = connect(addr).await;
        let (mut b, _id_b) = connect(addr).await;
        let (mut c, id_c) = connect(addr).await;
        wait_for_count(&hub, 3).await;

        a.send(Message::Text(drawing(r#""x1""#))).await.unwrap();
        assert_eq!(next_text(&mut b).await.unwrap(), drawing(r#""x1""#));
        assert_eq!(next_text(&mut c).await.unwrap(), drawing(r#""x1""#));
        expect_silence(&mut a).await;
        expect_silence(&mut b).await;

        b.close(None).await.unwrap();
        wait_for_count(&hub, 2).await;

        a.send(Message::Text(drawing(r#""x2""#))).await.unwrap();
        assert_eq!(next_text(&mut c).await.unwrap(), drawing(r#""x2""#));
        expect_silence(&mut a).await;

        let mut expected = vec![id_a, id_c];
        expected.sort();
        assert_eq!(hub.registry().ids().await, expected);
    }

    #[tokio::test]
    async fn test_payload_forwarded_verbatim_and_in_order() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut a, _) = connect(addr).await;
        let (mut b, _) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        for i in 0..50 {
            let frame = drawing(&format!(r#"{{ "seq": {},  "pts": [[1, 2], [3,4]] }}"#, i));
            a.send(Message::Text(frame)).await.unwrap();
        }
        for i in 0..50 {
            let expected = drawing(&format!(r#"{{ "seq": {},  "pts": [[1, 2], [3,4]] }}"#, i));
            assert_eq!(next_text(&mut b).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_binary_frames_forwarded() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut a, _) = connect(addr).await;
        let (mut b, _) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        a.send(Message::Binary(vec![1, 2, 3, 4])).await.unwrap();
        loop {
            match tokio::time::timeout(Duration::from_secs(2), b.next()).await.unwrap() {
                Some(Ok(Message::Binary(data))) => {
                    assert_eq!(data, vec![1, 2, 3, 4]);
                    break;
                }
                Some(Ok(Message::Ping(_))) => continue,
                other => panic!("期望二进制帧，收到: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_ping_event_answered_only_to_sender() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut a, _) = connect(addr).await;
        let (mut b, _) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        a.send(Message::Text(r#"{"event":"ping"}"#.to_string())).await.unwrap();
        let pong: serde_json::Value =
            serde_json::from_str(&next_text(&mut a).await.unwrap()).unwrap();
        assert_eq!(pong["event"], "pong");
        expect_silence(&mut b).await;
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_only_that_connection() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut bad, _) = connect(addr).await;
        let (mut a, _) = connect(addr).await;
        let (mut b, _) = connect(addr).await;
        wait_for_count(&hub, 3).await;

        bad.send(Message::Text("not json".to_string())).await.unwrap();
        assert!(next_text(&mut bad).await.is_none());
        wait_for_count(&hub, 2).await;

        a.send(Message::Text(drawing("1"))).await.unwrap();
        assert_eq!(next_text(&mut b).await.unwrap(), drawing("1"));
    }

    #[tokio::test]
    async fn test_unknown_event_ignored() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;
        let (mut a, _) = connect(addr).await;
        let (mut b, _) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        a.send(Message::Text(r#"{"event":"cursor","data":{"x":1}}"#.to_string()))
            .await
            .unwrap();
        expect_silence(&mut b).await;
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_read_timeout_closes_idle_connection() {
        let (addr, hub) = spawn_server(HubConfig {
            read_timeout_secs: 1,
            heartbeat_interval_secs: 0,
            ..HubConfig::default()
        })
        .await;
        let (mut idle, _) = connect(addr).await;
        wait_for_count(&hub, 1).await;

        let closed = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match idle.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_failed_upgrade_never_registers() {
        let (addr, hub) = spawn_server(HubConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 4"), "响应: {}", response);
        assert_eq!(hub.connection_count().await, 0);
    }

    /// 约 1 MiB 的绘图事件，几帧就能写满对端的 TCP 缓冲区
    fn large_drawing(seq: usize) -> String {
        drawing(&format!(r#"{{"seq":{},"fill":"{}"}}"#, seq, "a".repeat(1024 * 1024)))
    }

    /// 持续发送大帧，直到 stalled 被移出注册表
    async fn flood_until_gone(sender: &mut Client, hub: &Hub, stalled: &str) {
        for seq in 0..256 {
            if !hub.registry().contains(stalled).await {
                return;
            }
            sender.send(Message::Text(large_drawing(seq))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stalled_peer_evicted_and_unregistered() {
        let (addr, hub) = spawn_server(HubConfig {
            outbound_queue_capacity: 2,
            max_dropped_frames: 3,
            read_timeout_secs: 0,
            heartbeat_interval_secs: 0,
            max_message_bytes: 4 * 1024 * 1024,
            // 写超时足够长，只有驱逐能让连接断开
            write_timeout_secs: 600,
        })
        .await;
        let (mut a, id_a) = connect(addr).await;
        // b 只完成握手，之后从不读取
        let (_b, id_b) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        flood_until_gone(&mut a, &hub, &id_b).await;
        wait_for_count(&hub, 1).await;
        assert_eq!(hub.registry().ids().await, vec![id_a]);

        // 发送方不受影响
        a.send(Message::Text(r#"{"event":"ping"}"#.to_string())).await.unwrap();
        let pong: serde_json::Value =
            serde_json::from_str(&next_text(&mut a).await.unwrap()).unwrap();
        assert_eq!(pong["event"], "pong");
    }

    #[tokio::test]
    async fn test_write_timeout_tears_down_stalled_peer() {
        let (addr, hub) = spawn_server(HubConfig {
            outbound_queue_capacity: 2,
            // 不驱逐，只能靠写超时断开
            max_dropped_frames: 0,
            read_timeout_secs: 0,
            heartbeat_interval_secs: 0,
            max_message_bytes: 4 * 1024 * 1024,
            write_timeout_secs: 1,
        })
        .await;
        let (mut a, id_a) = connect(addr).await;
        let (_b, id_b) = connect(addr).await;
        wait_for_count(&hub, 2).await;

        flood_until_gone(&mut a, &hub, &id_b).await;
        wait_for_count(&hub, 1).await;
        assert_eq!(hub.registry().ids().await, vec![id_a]);
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(0), None);
        assert_eq!(seconds(5), Some(Duration::from_secs(5)));
    }
}
