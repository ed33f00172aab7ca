// ==========================================
// 离校手续审批系统 - 看板视图模型
// ==========================================
// 职责: 看板范围、过滤条件、视图行与视图数据获取
// ==========================================

use crate::domain::form::FormSnapshot;
use crate::domain::types::{ApprovalState, FormStatus};
use crate::engine::status_aggregator::StatusAggregator;
use crate::realtime::classifier::ClassifiedEvent;
use crate::realtime::error::RefreshError;
use crate::repository::workflow_store::{FormQuery, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ==========================================
// DashboardScope - 看板范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum DashboardScope {
    /// 管理员: 全部表单
    Admin,
    /// 部门员工: 本部门
    Staff { department: String },
    /// 学生: 本人表单
    Student { form_id: String },
}

impl DashboardScope {
    /// 事件是否与该看板相关
    ///
    /// 员工看板除本部门审批外,也关注新提交与本部门的再申请（都会改变待办列表）
    pub fn accepts(&self, event: &ClassifiedEvent) -> bool {
        match self {
            DashboardScope::Admin => true,
            DashboardScope::Staff { department } => match event {
                ClassifiedEvent::DepartmentAction { department: d, .. }
                | ClassifiedEvent::Reapplication { department: d, .. } => d == department,
                ClassifiedEvent::NewSubmission { .. } => true,
                ClassifiedEvent::Completion { .. } => false,
            },
            DashboardScope::Student { form_id } => event.form_id() == form_id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            DashboardScope::Admin => "admin".to_string(),
            DashboardScope::Staff { department } => format!("staff:{}", department),
            DashboardScope::Student { form_id } => format!("student:{}", form_id),
        }
    }

    /// 该范围 + 过滤条件对应的存储查询
    pub fn query(&self, filter: &ViewFilter) -> FormQuery {
        let mut query = FormQuery {
            form_status: filter.form_status,
            department_status: filter.department_status,
            ..FormQuery::default()
        };
        match self {
            DashboardScope::Admin => {}
            DashboardScope::Staff { department } => query.department = Some(department.clone()),
            DashboardScope::Student { form_id } => query.form_id = Some(form_id.clone()),
        }
        query
    }
}

impl fmt::Display for DashboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ==========================================
// ViewFilter - 当前标签页过滤
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub form_status: Option<FormStatus>,
    /// 员工看板: 本部门状态；其他看板: 任一部门处于该状态
    pub department_status: Option<ApprovalState>,
}

impl ViewFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// 员工"待审批"标签页
    pub fn pending_department() -> Self {
        Self {
            form_status: None,
            department_status: Some(ApprovalState::Pending),
        }
    }
}

// ==========================================
// ViewRow - 看板行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub form_id: String,
    pub registration_no: String,
    pub form_status: FormStatus,
    pub departments: BTreeMap<String, ApprovalState>,
    pub updated_at: DateTime<Utc>,
}

impl ViewRow {
    pub fn from_snapshot(snapshot: &FormSnapshot) -> Self {
        Self {
            form_id: snapshot.form.id.clone(),
            registration_no: snapshot.form.registration_no.clone(),
            form_status: snapshot.form.status,
            departments: snapshot
                .departments
                .iter()
                .map(|d| (d.department_name.clone(), d.status))
                .collect(),
            updated_at: snapshot.form.updated_at,
        }
    }

    /// 局部更新部门状态并本地重算表单状态
    ///
    /// 返回 None: 该行没有此部门（不能补丁）
    pub fn patched(&self, department: &str, status: ApprovalState) -> Option<ViewRow> {
        if !self.departments.contains_key(department) {
            return None;
        }

        let mut row = self.clone();
        row.departments.insert(department.to_string(), status);
        row.form_status = StatusAggregator::derive_from_states(row.departments.values().copied());
        Some(row)
    }

    pub fn matches(&self, scope: &DashboardScope, filter: &ViewFilter) -> bool {
        if let Some(status) = filter.form_status {
            if self.form_status != status {
                return false;
            }
        }

        if let Some(status) = filter.department_status {
            let hit = match scope {
                DashboardScope::Staff { department } => self.departments.get(department) == Some(&status),
                _ => self.departments.values().any(|s| *s == status),
            };
            if !hit {
                return false;
            }
        }

        true
    }
}

// ==========================================
// ViewState - 看板数据
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub rows: Vec<ViewRow>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// 最近一次刷新失败,仍展示上一次成功的数据
    pub stale: bool,
}

impl ViewState {
    pub fn row(&self, form_id: &str) -> Option<&ViewRow> {
        self.rows.iter().find(|r| r.form_id == form_id)
    }

    /// 替换单行，返回新视图
    pub fn with_row(&self, row: ViewRow) -> ViewState {
        let rows = self
            .rows
            .iter()
            .map(|r| if r.form_id == row.form_id { row.clone() } else { r.clone() })
            .collect();
        ViewState {
            rows,
            fetched_at: self.fetched_at,
            stale: self.stale,
        }
    }

    pub fn marked_stale(&self) -> ViewState {
        ViewState {
            stale: true,
            ..self.clone()
        }
    }
}

/// 推送给看板订阅者的更新
#[derive(Debug, Clone)]
pub enum ViewUpdate {
    Refreshed(Arc<ViewState>),
    Patched {
        form_id: String,
        department: String,
        view: Arc<ViewState>,
    },
    /// 刷新失败：保留上次数据并标记 stale
    Stale {
        reason: RefreshError,
        view: Arc<ViewState>,
    },
}

impl ViewUpdate {
    pub fn view(&self) -> &Arc<ViewState> {
        match self {
            ViewUpdate::Refreshed(view)
            | ViewUpdate::Patched { view, .. }
            | ViewUpdate::Stale { view, .. } => view,
        }
    }
}

// ==========================================
// ViewFetcher - 视图数据获取
// ==========================================
#[async_trait]
pub trait ViewFetcher: Send + Sync {
    async fn fetch(&self, scope: &DashboardScope, filter: &ViewFilter) -> Result<Vec<ViewRow>, RefreshError>;
}

/// 基于 WorkflowStore 的数据获取（阻塞查询放到 blocking 线程池）
pub struct StoreViewFetcher {
    store: Arc<dyn WorkflowStore>,
}

impl StoreViewFetcher {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ViewFetcher for StoreViewFetcher {
    async fn fetch(&self, scope: &DashboardScope, filter: &ViewFilter) -> Result<Vec<ViewRow>, RefreshError> {
        let store = Arc::clone(&self.store);
        let query = scope.query(filter);

        let snapshots = tokio::task::spawn_blocking(move || store.list_form_snapshots(&query))
            .await
            .map_err(|e| RefreshError::Aborted(e.to_string()))?
            .map_err(|e| RefreshError::Fetch(e.to_string()))?;

        Ok(snapshots.iter().map(ViewRow::from_snapshot).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(library: ApprovalState, hostel: ApprovalState) -> ViewRow {
        let departments: BTreeMap<String, ApprovalState> =
            [("library".to_string(), library), ("hostel".to_string(), hostel)].into_iter().collect();
        ViewRow {
            form_id: "F1".to_string(),
            registration_no: "21CS001".to_string(),
            form_status: StatusAggregator::derive_from_states(departments.values().copied()),
            departments,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_scope_acceptance() {
        let action = ClassifiedEvent::DepartmentAction {
            form_id: "F1".to_string(),
            department: "library".to_string(),
            new_status: ApprovalState::Approved,
        };
        assert!(DashboardScope::Admin.accepts(&action));
        assert!(DashboardScope::Staff { department: "library".to_string() }.accepts(&action));
        assert!(!DashboardScope::Staff { department: "hostel".to_string() }.accepts(&action));
        assert!(DashboardScope::Student { form_id: "F1".to_string() }.accepts(&action));
        assert!(!DashboardScope::Student { form_id: "F2".to_string() }.accepts(&action));
    }

    #[test]
    fn test_patch_recomputes_form_status() {
        let base = row(ApprovalState::Approved, ApprovalState::Pending);
        let patched = base.patched("hostel", ApprovalState::Approved).unwrap();
        assert_eq!(patched.form_status, FormStatus::Completed);
        assert!(base.patched("sports", ApprovalState::Approved).is_none());
    }

    #[test]
    fn test_pending_tab_filter() {
        let staff = DashboardScope::Staff { department: "library".to_string() };
        let filter = ViewFilter::pending_department();

        assert!(row(ApprovalState::Pending, ApprovalState::Approved).matches(&staff, &filter));
        assert!(!row(ApprovalState::Approved, ApprovalState::Pending).matches(&staff, &filter));
        assert!(row(ApprovalState::Approved, ApprovalState::Pending).matches(&DashboardScope::Admin, &filter));
    }
}
