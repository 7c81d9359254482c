/// 应用全局状态

use crate::ws::Hub;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 白板中继 Hub
    pub hub: Hub,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    /// 获取 Hub
    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }
}
