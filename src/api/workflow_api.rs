// ==========================================
// 离校手续审批系统 - 审批流程 API
// ==========================================
// 职责: 表单提交、部门审批、再申请、批量审批、快照查询
// 说明: 支持按学号（自然键）定位表单
// ==========================================

use std::sync::Arc;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::config::WorkflowRules;
use crate::domain::form::{FormSnapshot, NewForm, ReapplicationHistoryEntry};
use crate::domain::types::DepartmentDecision;
use crate::engine::reapplication::{ReapplicationCoordinator, ReapplicationOutcome, ReapplicationRequest};
use crate::engine::status_aggregator::{
    BulkActionReport, DepartmentActionOutcome, DepartmentActionRequest, StatusAggregator,
};
use crate::repository::workflow_store::{FormQuery, WorkflowStore};

// ==========================================
// WorkflowApi
// ==========================================

/// 审批流程API
///
/// 职责：
/// 1. 表单提交（学号规范化 + 部门列表校验）
/// 2. 部门审批 / 批量审批
/// 3. 学生再申请
/// 4. 表单快照与再申请历史查询
pub struct WorkflowApi {
    store: Arc<dyn WorkflowStore>,
    aggregator: StatusAggregator,
    reapplication: ReapplicationCoordinator,
    rules: WorkflowRules,
}

impl WorkflowApi {
    pub fn new(store: Arc<dyn WorkflowStore>, rules: WorkflowRules) -> Self {
        Self {
            aggregator: StatusAggregator::new(Arc::clone(&store), rules.clone()),
            reapplication: ReapplicationCoordinator::new(Arc::clone(&store), rules.clone()),
            store,
            rules,
        }
    }

    pub fn rules(&self) -> &WorkflowRules {
        &self.rules
    }

    // ==========================================
    // 表单提交
    // ==========================================

    /// 提交离校申请
    ///
    /// # 参数
    /// - registration_no: 学号（去除首尾空白并转大写）
    /// - departments: 需审批的部门列表（不能为空或重复）
    /// - certificate: 证书元数据（原样保存）
    pub fn submit_form(
        &self,
        registration_no: &str,
        departments: &[String],
        certificate: Option<serde_json::Value>,
    ) -> ApiResult<FormSnapshot> {
        let registration_no = normalize_registration(registration_no)?;

        let departments: Vec<String> = departments.iter().map(|d| d.trim().to_string()).collect();
        if departments.is_empty() {
            return Err(ApiError::InvalidInput("部门列表不能为空".to_string()));
        }

        let snapshot = self.store.create_form(&NewForm {
            registration_no,
            departments,
            certificate,
        })?;

        info!(
            form_id = %snapshot.form.id,
            registration_no = %snapshot.form.registration_no,
            departments = snapshot.departments.len(),
            "离校申请已提交"
        );
        Ok(snapshot)
    }

    // ==========================================
    // 部门审批
    // ==========================================

    pub fn file_department_action(
        &self,
        form_id: &str,
        department: &str,
        decision: DepartmentDecision,
        reason: Option<&str>,
        actor: &str,
    ) -> ApiResult<DepartmentActionOutcome> {
        let request = DepartmentActionRequest {
            form_id: form_id.to_string(),
            department: department.trim().to_string(),
            decision,
            reason: reason.map(str::to_string),
            actor: actor.trim().to_string(),
        };
        Ok(self.aggregator.apply_department_action(&request)?)
    }

    /// 按学号定位表单后执行部门审批
    pub fn file_department_action_by_registration(
        &self,
        registration_no: &str,
        department: &str,
        decision: DepartmentDecision,
        reason: Option<&str>,
        actor: &str,
    ) -> ApiResult<DepartmentActionOutcome> {
        let form_id = self.resolve_form_id(registration_no)?;
        self.file_department_action(&form_id, department, decision, reason, actor)
    }

    /// 同一部门批量审批
    ///
    /// 单个表单失败不会中断批次，失败明细在 report.failed 中返回
    pub fn apply_bulk_department_action(
        &self,
        form_ids: &[String],
        department: &str,
        decision: DepartmentDecision,
        reason: Option<&str>,
        actor: &str,
    ) -> ApiResult<BulkActionReport> {
        Ok(self
            .aggregator
            .apply_bulk(form_ids, department.trim(), decision, reason, actor.trim())?)
    }

    // ==========================================
    // 再申请
    // ==========================================

    pub fn file_reapplication(
        &self,
        form_id: &str,
        department: &str,
        student_message: &str,
    ) -> ApiResult<ReapplicationOutcome> {
        let request = ReapplicationRequest {
            form_id: form_id.to_string(),
            department: department.trim().to_string(),
            student_message: student_message.to_string(),
        };
        Ok(self.reapplication.file_reapplication(&request)?)
    }

    pub fn file_reapplication_by_registration(
        &self,
        registration_no: &str,
        department: &str,
        student_message: &str,
    ) -> ApiResult<ReapplicationOutcome> {
        let form_id = self.resolve_form_id(registration_no)?;
        self.file_reapplication(&form_id, department, student_message)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_form_snapshot(&self, form_id: &str) -> ApiResult<FormSnapshot> {
        self.store
            .list_form_snapshots(&FormQuery::for_form(form_id))?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("表单(id={})不存在", form_id)))
    }

    /// 再申请历史（按编号升序）
    pub fn list_reapplication_history(&self, form_id: &str) -> ApiResult<Vec<ReapplicationHistoryEntry>> {
        if self.store.get_form(form_id)?.is_none() {
            return Err(ApiError::NotFound(format!("表单(id={})不存在", form_id)));
        }
        Ok(self.store.list_reapplication_history(form_id)?)
    }

    fn resolve_form_id(&self, registration_no: &str) -> ApiResult<String> {
        let registration_no = normalize_registration(registration_no)?;
        let form = self
            .store
            .find_form_by_registration(&registration_no)?
            .ok_or_else(|| ApiError::NotFound(format!("学号 {} 没有离校申请", registration_no)))?;

        debug!(registration_no = %registration_no, form_id = %form.id, "学号解析完成");
        Ok(form.id)
    }
}

fn normalize_registration(registration_no: &str) -> ApiResult<String> {
    let normalized = registration_no.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(ApiError::InvalidInput("学号不能为空".to_string()));
    }
    Ok(normalized)
}
