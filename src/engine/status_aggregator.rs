// ==========================================
// 离校手续审批系统 - 状态聚合引擎
// ==========================================
// 职责: 部门审批动作 + 表单总体状态全量重算
// 红线: 总体状态只能由当前部门状态全集推导,不依赖事件历史
// 红线: 部门写入与总体状态重算处于同一工作单元
// ==========================================

use crate::config::WorkflowRules;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::form::DepartmentStatus;
use crate::domain::types::{ApprovalState, DepartmentDecision, FormStatus};
use crate::engine::error::{WorkflowError, WorkflowResult};
use crate::repository::workflow_store::{WorkflowStore, WorkflowUnit};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ==========================================
// 请求 / 结果
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentActionRequest {
    pub form_id: String,
    pub department: String,
    pub decision: DepartmentDecision,
    pub reason: Option<String>, // 驳回时必填,通过时必须为空
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentActionOutcome {
    pub form_id: String,
    pub department_status: DepartmentStatus,
    pub previous_form_status: FormStatus,
    pub form_status: FormStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkActionFailure {
    pub form_id: String,
    pub error: String,
}

/// 批量审批结果（逐表单独立提交）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkActionReport {
    pub succeeded: Vec<DepartmentActionOutcome>,
    pub failed: Vec<BulkActionFailure>,
}

// ==========================================
// StatusAggregator
// ==========================================
pub struct StatusAggregator {
    store: Arc<dyn WorkflowStore>,
    rules: WorkflowRules,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn WorkflowStore>, rules: WorkflowRules) -> Self {
        Self { store, rules }
    }

    // ==========================================
    // 纯函数: 状态推导
    // ==========================================

    /// 由部门状态全集推导表单状态
    ///
    /// - 任一驳回 → rejected
    /// - 全部通过（且非空）→ completed
    /// - 其他 → pending（含空集合）
    pub fn derive_from_states<I>(states: I) -> FormStatus
    where
        I: IntoIterator<Item = ApprovalState>,
    {
        let mut seen_any = false;
        let mut all_approved = true;

        for state in states {
            seen_any = true;
            match state {
                ApprovalState::Rejected => return FormStatus::Rejected,
                ApprovalState::Approved => {}
                ApprovalState::Pending => all_approved = false,
            }
        }

        if seen_any && all_approved {
            FormStatus::Completed
        } else {
            FormStatus::Pending
        }
    }

    pub fn derive_form_status(statuses: &[DepartmentStatus]) -> FormStatus {
        Self::derive_from_states(statuses.iter().map(|s| s.status))
    }

    // ==========================================
    // 部门审批（主入口）
    // ==========================================

    /// 执行部门审批并重算表单状态（单一工作单元）
    ///
    /// # 返回
    /// - Err(Validation): 原因缺失/多余
    /// - Err(InvalidTransition): 表单/部门不存在,或部门已终结
    /// - Err(StoreUnavailable): 存储故障（全部回滚）
    pub fn apply_department_action(
        &self,
        request: &DepartmentActionRequest,
    ) -> WorkflowResult<DepartmentActionOutcome> {
        Self::validate_request(request)?;

        let mut unit = self.store.begin()?;
        let outcome = Self::apply_within(unit.as_mut(), request)?;
        unit.commit()?;

        tracing::info!(
            form_id = %request.form_id,
            department = %request.department,
            decision = %request.decision.as_str(),
            form_status = %outcome.form_status,
            "部门审批完成"
        );

        Ok(outcome)
    }

    /// 在已开启的工作单元内执行审批（不提交）
    pub fn apply_within(
        unit: &mut (dyn WorkflowUnit + '_),
        request: &DepartmentActionRequest,
    ) -> WorkflowResult<DepartmentActionOutcome> {
        Self::validate_request(request)?;

        let form = unit.get_form(&request.form_id)?.ok_or_else(|| {
            WorkflowError::InvalidTransition(format!("表单不存在: {}", request.form_id))
        })?;

        let statuses = unit.get_department_statuses(&form.id)?;
        let current = statuses
            .iter()
            .find(|s| s.department_name == request.department)
            .ok_or_else(|| {
                WorkflowError::InvalidTransition(format!(
                    "表单 {} 不存在部门 {}",
                    form.id, request.department
                ))
            })?;

        if current.status != ApprovalState::Pending {
            return Err(WorkflowError::InvalidTransition(format!(
                "部门 {} 已处于 {} 状态，不能再次{}",
                current.department_name,
                current.status,
                request.decision.as_str()
            )));
        }

        let now = Utc::now();
        let is_reject = matches!(request.decision, DepartmentDecision::Reject);
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let next = DepartmentStatus {
            status: request.decision.target_state(),
            action_at: Some(now),
            action_by: Some(request.actor.trim().to_string()),
            rejection_reason: if is_reject { reason.clone() } else { None },
            rejection_count: if is_reject {
                current.rejection_count + 1
            } else {
                current.rejection_count
            },
            updated_at: now,
            ..current.clone()
        };

        unit.write_department_status(&next)?;

        let action_type = if is_reject {
            ActionType::DepartmentReject
        } else {
            ActionType::DepartmentApprove
        };
        unit.append_action_log(
            &ActionLog::new(&form.id, action_type, request.actor.trim())
                .with_department(&request.department)
                .with_payload(&json!({
                    "decision": request.decision.as_str(),
                    "reason": reason,
                })),
        )?;

        let form_status = Self::recompute_form_status(unit, &form.id)?;

        Ok(DepartmentActionOutcome {
            form_id: form.id,
            department_status: next,
            previous_form_status: form.status,
            form_status,
        })
    }

    /// 重新读取完整部门状态集并重算表单状态（仅在变化时写入）
    pub fn recompute_form_status(unit: &mut (dyn WorkflowUnit + '_), form_id: &str) -> WorkflowResult<FormStatus> {
        let form = unit.get_form(form_id)?.ok_or_else(|| {
            WorkflowError::InvalidTransition(format!("表单不存在: {}", form_id))
        })?;
        let statuses = unit.get_department_statuses(form_id)?;
        let derived = Self::derive_form_status(&statuses);

        if derived != form.status {
            tracing::debug!(
                form_id = %form_id,
                from = %form.status,
                to = %derived,
                "表单状态重算"
            );
            unit.write_form_status(form_id, derived)?;
        }

        Ok(derived)
    }

    // ==========================================
    // 批量审批
    // ==========================================

    /// 同一部门对多个表单执行相同动作
    ///
    /// 每个表单独立提交；单个失败不影响其余表单
    pub fn apply_bulk(
        &self,
        form_ids: &[String],
        department: &str,
        decision: DepartmentDecision,
        reason: Option<&str>,
        actor: &str,
    ) -> WorkflowResult<BulkActionReport> {
        if form_ids.is_empty() {
            return Err(WorkflowError::Validation("批量审批表单列表为空".to_string()));
        }
        if form_ids.len() > self.rules.max_bulk_actions {
            return Err(WorkflowError::Validation(format!(
                "批量审批数量 {} 超过上限 {}",
                form_ids.len(),
                self.rules.max_bulk_actions
            )));
        }

        let mut report = BulkActionReport::default();
        for form_id in form_ids {
            let request = DepartmentActionRequest {
                form_id: form_id.clone(),
                department: department.to_string(),
                decision,
                reason: reason.map(str::to_string),
                actor: actor.to_string(),
            };

            match self.apply_department_action(&request) {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(e) => {
                    tracing::warn!(form_id = %form_id, error = %e, "批量审批单项失败");
                    report.failed.push(BulkActionFailure {
                        form_id: form_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            department = %department,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "批量审批完成"
        );
        Ok(report)
    }

    fn validate_request(request: &DepartmentActionRequest) -> WorkflowResult<()> {
        if request.actor.trim().is_empty() {
            return Err(WorkflowError::Validation("操作人不能为空".to_string()));
        }

        let has_reason = request
            .reason
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false);

        match request.decision {
            DepartmentDecision::Reject if !has_reason => Err(WorkflowError::Validation(
                "驳回必须填写原因".to_string(),
            )),
            DepartmentDecision::Approve if has_reason => Err(WorkflowError::Validation(
                "通过时不允许填写驳回原因".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::form::NewForm;
    use crate::repository::workflow_store_impl::SqliteWorkflowStore;

    fn setup(departments: &[&str]) -> (Arc<SqliteWorkflowStore>, StatusAggregator, String) {
        let store = Arc::new(SqliteWorkflowStore::open_in_memory().unwrap());
        let snapshot = store
            .create_form(&NewForm {
                registration_no: "21CS100".to_string(),
                departments: departments.iter().map(|d| d.to_string()).collect(),
                certificate: None,
            })
            .unwrap();
        let aggregator = StatusAggregator::new(store.clone(), WorkflowRules::default());
        (store, aggregator, snapshot.form.id)
    }

    fn request(form_id: &str, department: &str, decision: DepartmentDecision, reason: Option<&str>) -> DepartmentActionRequest {
        DepartmentActionRequest {
            form_id: form_id.to_string(),
            department: department.to_string(),
            decision,
            reason: reason.map(str::to_string),
            actor: "staff".to_string(),
        }
    }

    #[test]
    fn test_derive_over_all_combinations() {
        let states = [ApprovalState::Pending, ApprovalState::Approved, ApprovalState::Rejected];
        for a in states {
            for b in states {
                for c in states {
                    let set = [a, b, c];
                    let derived = StatusAggregator::derive_from_states(set);
                    let all_approved = set.iter().all(|s| *s == ApprovalState::Approved);
                    let any_rejected = set.iter().any(|s| *s == ApprovalState::Rejected);
                    assert_eq!(derived == FormStatus::Completed, all_approved);
                    assert_eq!(derived == FormStatus::Rejected, any_rejected);
                }
            }
        }
    }

    #[test]
    fn test_derive_empty_set_is_pending() {
        assert_eq!(StatusAggregator::derive_from_states(Vec::<ApprovalState>::new()), FormStatus::Pending);
    }

    #[test]
    fn test_reason_rules() {
        let (store, aggregator, form_id) = setup(&["library"]);

        let missing = aggregator.apply_department_action(&request(&form_id, "library", DepartmentDecision::Reject, Some("  ")));
        assert!(matches!(missing, Err(WorkflowError::Validation(_))));

        let extra = aggregator.apply_department_action(&request(&form_id, "library", DepartmentDecision::Approve, Some("ok")));
        assert!(matches!(extra, Err(WorkflowError::Validation(_))));

        let statuses = store.get_department_statuses(&form_id).unwrap();
        assert!(statuses.iter().all(|s| s.status == ApprovalState::Pending));
        assert_eq!(store.list_action_logs(&form_id).unwrap().len(), 1);
    }

    #[test]
    fn test_finalized_department_cannot_be_overwritten() {
        let (_store, aggregator, form_id) = setup(&["library", "hostel"]);

        aggregator
            .apply_department_action(&request(&form_id, "library", DepartmentDecision::Approve, None))
            .unwrap();
        let again = aggregator.apply_department_action(&request(&form_id, "library", DepartmentDecision::Reject, Some("late")));
        assert!(matches!(again, Err(WorkflowError::InvalidTransition(_))));

        let unknown = aggregator.apply_department_action(&request(&form_id, "sports", DepartmentDecision::Approve, None));
        assert!(matches!(unknown, Err(WorkflowError::InvalidTransition(_))));
    }

    #[test]
    fn test_reject_then_complete_flow() {
        let (store, aggregator, form_id) = setup(&["library", "hostel"]);

        let outcome = aggregator
            .apply_department_action(&request(&form_id, "hostel", DepartmentDecision::Reject, Some("fees due")))
            .unwrap();
        assert_eq!(outcome.form_status, FormStatus::Rejected);
        assert_eq!(outcome.department_status.rejection_count, 1);
        assert_eq!(outcome.department_status.rejection_reason.as_deref(), Some("fees due"));

        let outcome = aggregator
            .apply_department_action(&request(&form_id, "library", DepartmentDecision::Approve, None))
            .unwrap();
        assert_eq!(outcome.form_status, FormStatus::Rejected);

        let form = store.get_form(&form_id).unwrap().unwrap();
        assert_eq!(form.status, FormStatus::Rejected);
    }

    #[test]
    fn test_bulk_reports_per_form() {
        let (store, aggregator, form_id) = setup(&["library"]);
        let other = store
            .create_form(&NewForm {
                registration_no: "21CS101".to_string(),
                departments: vec!["library".to_string()],
                certificate: None,
            })
            .unwrap();

        let report = aggregator
            .apply_bulk(
                &[form_id.clone(), "missing".to_string(), other.form.id.clone()],
                "library",
                DepartmentDecision::Approve,
                None,
                "librarian",
            )
            .unwrap();

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].form_id, "missing");
        assert!(report.succeeded.iter().all(|o| o.form_status == FormStatus::Completed));
    }

    #[test]
    fn test_bulk_limit() {
        let store = Arc::new(SqliteWorkflowStore::open_in_memory().unwrap());
        let rules = WorkflowRules {
            max_bulk_actions: 1,
            ..WorkflowRules::default()
        };
        let aggregator = StatusAggregator::new(store, rules);

        let result = aggregator.apply_bulk(
            &["a".to_string(), "b".to_string()],
            "library",
            DepartmentDecision::Approve,
            None,
            "librarian",
        );
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }
}
