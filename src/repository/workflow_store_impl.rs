// ==========================================
// 离校手续审批系统 - 审批流存储实现
// ==========================================
// 职责: 使用 rusqlite 实现 WorkflowStore / WorkflowUnit
// 红线: 变更通知只在提交成功后按写入顺序发布
// ==========================================

mod core;
mod rows;
mod unit;

#[cfg(test)]
mod tests;

pub use core::SqliteWorkflowStore;
pub use unit::SqliteWorkflowUnit;
