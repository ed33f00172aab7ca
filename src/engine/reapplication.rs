// ==========================================
// 离校手续审批系统 - 再申请协调器
// ==========================================
// 职责: 驳回 → 学生更正 → 单部门重置 + 历史记录
// 红线: 只重置目标部门,其他部门行不得写入
// 红线: 表单计数写入先于部门重置（下游依赖该顺序识别再申请）
// ==========================================

use crate::config::WorkflowRules;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::form::{ReapplicationHistoryEntry, RejectionSnapshot};
use crate::domain::types::{ApprovalState, FormStatus};
use crate::engine::error::{WorkflowError, WorkflowResult};
use crate::engine::status_aggregator::StatusAggregator;
use crate::repository::workflow_store::WorkflowStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReapplicationRequest {
    pub form_id: String,
    pub department: String,
    pub student_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReapplicationOutcome {
    pub form_id: String,
    pub department: String,
    pub history_entry: ReapplicationHistoryEntry,
    pub form_status: FormStatus,
    pub remaining_attempts: i32,
}

// ==========================================
// ReapplicationCoordinator
// ==========================================
pub struct ReapplicationCoordinator {
    store: Arc<dyn WorkflowStore>,
    rules: WorkflowRules,
}

impl ReapplicationCoordinator {
    pub fn new(store: Arc<dyn WorkflowStore>, rules: WorkflowRules) -> Self {
        Self { store, rules }
    }

    /// 提交再申请（单一工作单元）
    ///
    /// # 步骤
    /// 1. 快照当前驳回信息 → 历史记录（编号 = 原次数 + 1）
    /// 2. 表单 reapplication_count + 1, last_reapplied_at = now
    /// 3. 目标部门重置为 pending 并清空审批字段
    /// 4. 全量重算表单状态
    ///
    /// # 返回
    /// - Err(Validation): 留言过短
    /// - Err(InvalidState): 表单不存在/已完成、部门未驳回、再申请次数已达上限
    pub fn file_reapplication(&self, request: &ReapplicationRequest) -> WorkflowResult<ReapplicationOutcome> {
        let message = request.student_message.trim();
        if message.chars().count() < self.rules.min_reapply_message_len {
            return Err(WorkflowError::Validation(format!(
                "再申请留言至少 {} 个字符",
                self.rules.min_reapply_message_len
            )));
        }

        let mut unit = self.store.begin()?;

        let form = unit
            .get_form(&request.form_id)?
            .ok_or_else(|| WorkflowError::InvalidState(format!("表单不存在: {}", request.form_id)))?;

        if form.status == FormStatus::Completed {
            return Err(WorkflowError::InvalidState(format!(
                "表单 {} 已全部通过，不能再申请",
                form.id
            )));
        }

        let statuses = unit.get_department_statuses(&form.id)?;
        let current = statuses
            .iter()
            .find(|s| s.department_name == request.department)
            .ok_or_else(|| {
                WorkflowError::InvalidState(format!("表单 {} 不存在部门 {}", form.id, request.department))
            })?;

        if current.status != ApprovalState::Rejected {
            return Err(WorkflowError::InvalidState(format!(
                "部门 {} 当前为 {}，只有驳回状态可以再申请",
                current.department_name, current.status
            )));
        }

        let max_attempts = self.rules.max_reapplications_per_department;
        if current.rejection_count >= max_attempts {
            return Err(WorkflowError::InvalidState(format!(
                "部门 {} 再申请次数已达上限 ({})",
                current.department_name, max_attempts
            )));
        }

        let now = Utc::now();
        let reapplication_number = form.reapplication_count + 1;
        let entry = ReapplicationHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            form_id: form.id.clone(),
            reapplication_number,
            department_name: current.department_name.clone(),
            rejection: RejectionSnapshot::of(current),
            student_message: message.to_string(),
            created_at: now,
        };

        unit.append_reapplication_history(&entry)?;
        unit.write_form_reapplication(&form.id, reapplication_number, now)?;
        unit.write_department_status(&current.reopened(now))?;
        unit.append_action_log(
            &ActionLog::new(&form.id, ActionType::Reapplication, &form.registration_no)
                .with_department(&current.department_name)
                .with_payload(&json!({
                    "reapplication_number": reapplication_number,
                    "previous_reason": current.rejection_reason,
                }))
                .with_detail(message.to_string()),
        )?;

        let form_status = StatusAggregator::recompute_form_status(unit.as_mut(), &form.id)?;
        unit.commit()?;

        tracing::info!(
            form_id = %form.id,
            department = %request.department,
            reapplication_number,
            form_status = %form_status,
            "再申请已提交"
        );

        Ok(ReapplicationOutcome {
            form_id: form.id,
            department: request.department.clone(),
            history_entry: entry,
            form_status,
            remaining_attempts: (max_attempts - (current.rejection_count + 1)).max(0),
        })
    }
}
