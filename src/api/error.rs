// ==========================================
// 离校手续审批系统 - API层错误类型
// ==========================================
// 职责: 将引擎/实时层/仓储层错误转换为面向调用方的错误消息
// 约定: 所有错误信息必须包含显式原因
// ==========================================

use crate::engine::error::WorkflowError;
use crate::realtime::error::RefreshError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: {0}")]
    InvalidStateTransition(String),

    #[error("当前状态不允许该操作: {0}")]
    InvalidState(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    // ==========================================
    // 实时刷新错误
    // ==========================================
    #[error("看板刷新超时: scope={scope}, after={after_ms}ms")]
    RefreshTimeout { scope: String, after_ms: u64 },

    #[error("看板刷新失败: {0}")]
    RefreshFailed(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 调用方可重试（存储故障或刷新超时）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::StoreUnavailable(_) | ApiError::RefreshTimeout { .. } | ApiError::RefreshFailed(_)
        )
    }
}

// ==========================================
// 从 WorkflowError 转换
// ==========================================
impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(msg) => ApiError::InvalidInput(msg),
            WorkflowError::InvalidTransition(msg) => ApiError::InvalidStateTransition(msg),
            WorkflowError::InvalidState(msg) => ApiError::InvalidState(msg),
            WorkflowError::StoreUnavailable(source) => ApiError::StoreUnavailable(source.to_string()),
        }
    }
}

// ==========================================
// 从 RefreshError 转换
// ==========================================
impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Timeout { scope, after_ms } => ApiError::RefreshTimeout { scope, after_ms },
            RefreshError::Fetch(msg) => ApiError::RefreshFailed(msg),
            RefreshError::Aborted(msg) => ApiError::RefreshFailed(format!("刷新已中止: {}", msg)),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换（只读查询路径）
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            other => ApiError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
