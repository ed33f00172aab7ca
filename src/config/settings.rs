// ==========================================
// 离校手续审批系统 - 配置值对象
// ==========================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ==========================================
// RealtimeConfig - 实时同步参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub debounce_ms: u64,        // 防抖窗口
    pub refresh_timeout_ms: u64, // 单次刷新超时上限
    pub channel_capacity: usize, // 广播通道容量
    pub poll_interval_ms: u64,   // 兜底轮询间隔（0 = 关闭）
    pub targeted_patch: bool,    // 是否启用行级补丁
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            refresh_timeout_ms: 30_000,
            channel_capacity: 256,
            poll_interval_ms: 0,
            targeted_patch: true,
        }
    }
}

impl RealtimeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// 轮询间隔；0 表示关闭
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

// ==========================================
// WorkflowRules - 审批规则参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRules {
    pub max_reapplications_per_department: i32,
    pub min_reapply_message_len: usize,
    pub max_bulk_actions: usize,
}

impl Default for WorkflowRules {
    fn default() -> Self {
        Self {
            max_reapplications_per_department: 5,
            min_reapply_message_len: 5,
            max_bulk_actions: 100,
        }
    }
}
