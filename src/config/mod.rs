// ==========================================
// 离校手续审批系统 - 配置层
// ==========================================
// 职责: 实时同步参数与审批规则的加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod settings;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use settings::{RealtimeConfig, WorkflowRules};
