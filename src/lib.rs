// ==========================================
// 离校手续审批系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + Tokio
// 系统定位: 多部门审批聚合 + 看板实时同步
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问与变更通知
pub mod repository;

// 引擎层 - 审批状态机与再申请规则
pub mod engine;

// 实时同步层 - 事件分类、广播、看板刷新
pub mod realtime;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/表结构）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组件装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ApprovalState, DepartmentDecision, FormStatus};

// 领域实体
pub use domain::{ActionLog, ActionType, DepartmentStatus, Form, FormSnapshot, ReapplicationHistoryEntry};

// 引擎
pub use engine::{ReapplicationCoordinator, StatusAggregator, WorkflowError};

// 实时同步
pub use realtime::{
    ChangeClassifier, ClassifiedEvent, DashboardScope, RealtimeBridge, RealtimeChannel, RefreshCoordinator,
};

// API
pub use api::{ApiError, WorkflowApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "离校手续审批系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
