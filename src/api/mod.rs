// ==========================================
// 离校手续审批系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供应用层与前端命令调用
// ==========================================

pub mod error;
pub mod workflow_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use workflow_api::WorkflowApi;
