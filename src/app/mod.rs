// ==========================================
// 离校手续审批系统 - 应用层
// ==========================================
// 职责: 组装存储、引擎、实时同步与 API 实例
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
