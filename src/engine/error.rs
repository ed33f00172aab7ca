// ==========================================
// 离校手续审批系统 - 审批引擎错误类型
// ==========================================
// 约定:
// - Validation / InvalidTransition / InvalidState: 终止性错误,不写入任何数据
// - StoreUnavailable: 存储故障,整个工作单元回滚
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// 输入不合法（如驳回缺少原因）
    #[error("输入校验失败: {0}")]
    Validation(String),

    /// 部门状态已终结或不存在
    #[error("无效的状态转换: {0}")]
    InvalidTransition(String),

    /// 再申请前置状态不满足
    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(#[source] RepositoryError),
}

impl WorkflowError {
    /// 是否为终止性业务错误（重试无意义）
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowError::StoreUnavailable(_))
    }
}

// 所有存储故障统一视为 StoreUnavailable
impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        WorkflowError::StoreUnavailable(err)
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
