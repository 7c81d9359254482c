/// 广播分发器
///
/// 把一个连接发来的绘图负载转发给其他所有在线连接。
///
/// 背压策略：每个连接一个有界出站队列，队列满时丢弃新帧（drop-newest），
/// 累计丢帧达到 `max_dropped_frames` 后触发该连接的关闭信号。
/// 分发过程只做非阻塞投递，慢连接不会拖慢其他连接。

use super::registry::{ConnectionRegistry, SendOutcome};
use common::{Payload, RelayError, Result, ServerEvent, WireFrame};
use std::sync::Arc;
use tracing::{debug, warn};

/// 单次广播的投递统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 目标连接数（不含发送方）
    pub targets: usize,
    /// 成功入队
    pub delivered: usize,
    /// 队列满被丢弃
    pub dropped: usize,
    /// 队列已关闭
    pub failed: usize,
    /// 因持续丢帧被断开
    pub evicted: usize,
}

/// 广播分发器
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    /// 0 表示从不因丢帧断开连接
    max_dropped_frames: u64,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry, max_dropped_frames: u64) -> Self {
        Self {
            registry,
            max_dropped_frames,
        }
    }

    /// 广播绘图负载，负载只编码一次
    pub async fn broadcast(&self, origin_id: &str, payload: &Payload) -> Result<BroadcastReport> {
        let frame = Arc::new(ServerEvent::drawing(payload)?);
        Ok(self.broadcast_frame(origin_id, frame).await)
    }

    /// 向除 `origin_id` 外的所有在线连接投递已编码的帧
    pub async fn broadcast_frame(&self, origin_id: &str, frame: Arc<WireFrame>) -> BroadcastReport {
        let targets = self.registry.snapshot().await;
        let mut report = BroadcastReport::default();

        for conn in targets.iter().filter(|conn| conn.id != origin_id) {
            report.targets += 1;

            match conn.try_send(frame.clone()) {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Dropped(total) => {
                    report.dropped += 1;
                    if self.max_dropped_frames > 0 && total >= self.max_dropped_frames {
                        if !conn.is_closing() {
                            warn!("连接 {} 处理过慢，累计丢帧 {}，断开连接", conn.id, total);
                            report.evicted += 1;
                        }
                        conn.close();
                    } else {
                        warn!("连接 {} 出站队列已满，丢弃一帧 (累计 {})", conn.id, total);
                    }
                }
                SendOutcome::Closed => {
                    report.failed += 1;
                    let err = RelayError::write(&conn.id, "出站队列已关闭");
                    warn!("广播失败: {}", err);
                    conn.close();
                }
            }
        }

        debug!(
            "广播完成: origin={}, bytes={}, targets={}, delivered={}, dropped={}, failed={}, evicted={}",
            origin_id,
            frame.len(),
            report.targets,
            report.delivered,
            report.dropped,
            report.failed,
            report.evicted
        );
        report
    }
}
