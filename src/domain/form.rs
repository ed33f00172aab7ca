// ==========================================
// 离校手续审批系统 - 表单领域模型
// ==========================================
// 职责: Form / DepartmentStatus / 再申请历史
// 红线: 每个表单每个在册部门恰好一条 DepartmentStatus
// ==========================================

use crate::domain::types::{ApprovalState, FormStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// Form - 离校申请表单
// ==========================================
// 对齐: no_dues_forms 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub registration_no: String,                 // 学号（自然键，唯一）
    pub status: FormStatus,                      // 总体状态（由部门状态推导）
    pub reapplication_count: i32,                // 再申请次数
    pub last_reapplied_at: Option<DateTime<Utc>>, // 最近一次再申请时间
    pub certificate: Option<JsonValue>,          // 证书元数据（本层不解析）
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// DepartmentStatus - 部门审批记录
// ==========================================
// 对齐: no_dues_status 表
// 约束: action_at 只在终态转换时写入,只在再申请时清空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentStatus {
    pub id: String,
    pub form_id: String,
    pub department_name: String,
    pub status: ApprovalState,
    pub action_at: Option<DateTime<Utc>>,
    pub action_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub rejection_count: i32, // 累计驳回次数（用于再申请上限）
    pub updated_at: DateTime<Utc>,
}

impl DepartmentStatus {
    /// 创建待审批记录（提交时使用）
    pub fn pending(form_id: &str, department_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            form_id: form_id.to_string(),
            department_name: department_name.to_string(),
            status: ApprovalState::Pending,
            action_at: None,
            action_by: None,
            rejection_reason: None,
            rejection_count: 0,
            updated_at: now,
        }
    }

    /// 再申请重开: 回到 pending 并清空审批字段
    pub fn reopened(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: ApprovalState::Pending,
            action_at: None,
            action_by: None,
            rejection_reason: None,
            updated_at: now,
            ..self.clone()
        }
    }
}

// ==========================================
// RejectionSnapshot - 驳回快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionSnapshot {
    pub department_name: String,
    pub reason: Option<String>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl RejectionSnapshot {
    pub fn of(status: &DepartmentStatus) -> Self {
        Self {
            department_name: status.department_name.clone(),
            reason: status.rejection_reason.clone(),
            rejected_by: status.action_by.clone(),
            rejected_at: status.action_at,
        }
    }
}

// ==========================================
// ReapplicationHistoryEntry - 再申请历史
// ==========================================
// 对齐: no_dues_reapplication_history 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReapplicationHistoryEntry {
    pub id: String,
    pub form_id: String,
    pub reapplication_number: i32, // 顺序号 = 之前次数 + 1
    pub department_name: String,
    pub rejection: RejectionSnapshot,
    pub student_message: String,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// NewForm - 提交参数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewForm {
    pub registration_no: String,
    pub departments: Vec<String>,
    pub certificate: Option<JsonValue>,
}

// ==========================================
// FormSnapshot - 表单 + 全部部门状态
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub form: Form,
    pub departments: Vec<DepartmentStatus>,
}

impl FormSnapshot {
    /// 按部门名查找（禁止按数组下标取值）
    pub fn department(&self, department_name: &str) -> Option<&DepartmentStatus> {
        self.departments
            .iter()
            .find(|d| d.department_name == department_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopened_clears_action_fields_only() {
        let now = Utc::now();
        let mut status = DepartmentStatus::pending("F1", "hostel", now);
        status.status = ApprovalState::Rejected;
        status.action_at = Some(now);
        status.action_by = Some("warden".to_string());
        status.rejection_reason = Some("fees due".to_string());
        status.rejection_count = 2;

        let reopened = status.reopened(now);
        assert_eq!(reopened.status, ApprovalState::Pending);
        assert!(reopened.action_at.is_none());
        assert!(reopened.action_by.is_none());
        assert!(reopened.rejection_reason.is_none());
        assert_eq!(reopened.rejection_count, 2);
        assert_eq!(reopened.id, status.id);
    }

    #[test]
    fn test_snapshot_lookup_is_keyed() {
        let now = Utc::now();
        let form = Form {
            id: "F1".to_string(),
            registration_no: "21CS001".to_string(),
            status: FormStatus::Pending,
            reapplication_count: 0,
            last_reapplied_at: None,
            certificate: None,
            created_at: now,
            updated_at: now,
        };
        let snapshot = FormSnapshot {
            form,
            departments: vec![
                DepartmentStatus::pending("F1", "library", now),
                DepartmentStatus::pending("F1", "hostel", now),
            ],
        };

        assert_eq!(snapshot.department("hostel").unwrap().department_name, "hostel");
        assert!(snapshot.department("accounts").is_none());
    }
}
