// ==========================================
// 离校手续审批系统 - 实时层错误类型
// ==========================================

use crate::engine::events::{ChangeKind, ChangeTable};
use thiserror::Error;

/// 单个看板刷新失败（只影响该看板）
///
/// Clone: 同一次在途刷新的结果会分发给所有等待者
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("刷新超时: scope={scope}, after={after_ms}ms")]
    Timeout { scope: String, after_ms: u64 },

    #[error("刷新数据获取失败: {0}")]
    Fetch(String),

    #[error("刷新已中止: {0}")]
    Aborted(String),
}

/// 原始变更无法分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    /// 结构不符合任何已知形态（记录告警,不做猜测）
    #[error("无法识别的变更: {kind} on {table}: {detail}")]
    Unrecognized {
        kind: ChangeKind,
        table: ChangeTable,
        detail: String,
    },

    /// 结构合法但不携带看板信号（如部门行插入、表单回到 pending）
    #[error("无语义变更: {kind} on {table}")]
    NoSemanticChange { kind: ChangeKind, table: ChangeTable },
}
