// ==========================================
// 离校手续审批系统 - 审批流存储 Trait
// ==========================================
// 职责: 定义表单/部门状态/再申请历史的数据访问接口
// 红线: Repository 不含业务规则，只做数据 CRUD 与变更通知
// ==========================================

use crate::domain::action_log::ActionLog;
use crate::domain::form::{DepartmentStatus, Form, FormSnapshot, NewForm, ReapplicationHistoryEntry};
use crate::domain::types::{ApprovalState, FormStatus};
use crate::engine::events::{ChangeEvent, ChangeFeed, ChangeTable};
use crate::repository::error::RepositoryResult;
use chrono::{DateTime, Utc};

// ==========================================
// WorkflowUnit - 原子工作单元
// ==========================================
// 生命周期内独占连接（BEGIN IMMEDIATE ... COMMIT）
// 未 commit 即 drop 时回滚，且不发布任何变更通知
pub trait WorkflowUnit {
    // ===== 读取（事务内可见未提交写入）=====

    fn get_form(&mut self, form_id: &str) -> RepositoryResult<Option<Form>>;

    /// 读取表单当前全部部门状态
    fn get_department_statuses(&mut self, form_id: &str) -> RepositoryResult<Vec<DepartmentStatus>>;

    // ===== 写入（每次行写入记录一条 ChangeEvent）=====

    /// 按 id 覆写部门状态行
    fn write_department_status(&mut self, status: &DepartmentStatus) -> RepositoryResult<()>;

    /// 写入表单总体状态
    fn write_form_status(&mut self, form_id: &str, status: FormStatus) -> RepositoryResult<()>;

    /// 写入再申请次数与时间
    fn write_form_reapplication(
        &mut self,
        form_id: &str,
        reapplication_count: i32,
        reapplied_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    fn append_reapplication_history(&mut self, entry: &ReapplicationHistoryEntry) -> RepositoryResult<()>;

    /// 追加审计日志（不产生变更通知）
    fn append_action_log(&mut self, log: &ActionLog) -> RepositoryResult<()>;

    // ===== 提交 =====

    /// 提交并按写入顺序发布变更通知
    ///
    /// # 返回
    /// - Ok(events): 本单元发布的全部变更
    /// - Err: 提交失败（已回滚，未发布）
    fn commit(self: Box<Self>) -> RepositoryResult<Vec<ChangeEvent>>;
}

// ==========================================
// FormQuery - 快照查询条件
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormQuery {
    pub form_id: Option<String>,
    pub form_status: Option<FormStatus>,
    /// 与 department_status 组合: 该部门处于指定状态的表单
    pub department: Option<String>,
    pub department_status: Option<ApprovalState>,
    pub limit: Option<usize>,
}

impl FormQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_form(form_id: &str) -> Self {
        Self {
            form_id: Some(form_id.to_string()),
            ..Self::default()
        }
    }
}

// ==========================================
// WorkflowStore Trait
// ==========================================
// 实现者: SqliteWorkflowStore（使用 rusqlite）
pub trait WorkflowStore: Send + Sync {
    /// 开启一个原子工作单元
    fn begin(&self) -> RepositoryResult<Box<dyn WorkflowUnit + '_>>;

    /// 提交新表单: Form + 每个部门一条 pending 记录（同一事务）
    fn create_form(&self, new_form: &NewForm) -> RepositoryResult<FormSnapshot>;

    fn get_form(&self, form_id: &str) -> RepositoryResult<Option<Form>>;

    /// 按学号查询表单
    fn find_form_by_registration(&self, registration_no: &str) -> RepositoryResult<Option<Form>>;

    fn get_department_statuses(&self, form_id: &str) -> RepositoryResult<Vec<DepartmentStatus>>;

    /// 查询表单快照（按 created_at 倒序）
    fn list_form_snapshots(&self, query: &FormQuery) -> RepositoryResult<Vec<FormSnapshot>>;

    /// 再申请历史（按 reapplication_number 升序）
    fn list_reapplication_history(&self, form_id: &str) -> RepositoryResult<Vec<ReapplicationHistoryEntry>>;

    fn list_action_logs(&self, form_id: &str) -> RepositoryResult<Vec<ActionLog>>;

    /// 订阅指定表的已提交变更
    fn subscribe_changes(&self, tables: &[ChangeTable]) -> ChangeFeed;
}
