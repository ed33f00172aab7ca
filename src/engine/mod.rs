// ==========================================
// 离校手续审批系统 - 引擎层
// ==========================================
// 职责: 实现审批状态机与再申请规则,不拼 SQL
// 红线: Engine 不拼 SQL, 所有拒绝必须输出原因
// ==========================================

pub mod error;
pub mod events;
pub mod reapplication;
pub mod status_aggregator;

// 重导出核心引擎
pub use error::{WorkflowError, WorkflowResult};
pub use events::{ChangeEvent, ChangeFeed, ChangeKind, ChangeNotifier, ChangeTable, RowImage};
pub use reapplication::{ReapplicationCoordinator, ReapplicationOutcome, ReapplicationRequest};
pub use status_aggregator::{
    BulkActionFailure, BulkActionReport, DepartmentActionOutcome, DepartmentActionRequest,
    StatusAggregator,
};
