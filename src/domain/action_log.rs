// ==========================================
// 离校手续审批系统 - 操作日志领域模型
// ==========================================
// 职责: 部门审批、再申请、提交的审计记录
// 红线: 所有写入必须记录,且与业务写入处于同一工作单元
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
// 对齐: action_log 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,               // 日志ID
    pub form_id: Option<String>,         // 关联表单
    pub action_type: String,             // 操作类型 (存储为字符串)
    pub action_ts: DateTime<Utc>,        // 操作时间戳
    pub actor: String,                   // 操作人
    pub department_name: Option<String>, // 涉及部门
    pub payload_json: Option<JsonValue>, // 操作参数 (JSON)
    pub detail: Option<String>,          // 详细描述
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Submission,        // 提交表单
    DepartmentApprove, // 部门通过
    DepartmentReject,  // 部门驳回
    Reapplication,     // 学生再申请
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Submission => "Submission",
            ActionType::DepartmentApprove => "DepartmentApprove",
            ActionType::DepartmentReject => "DepartmentReject",
            ActionType::Reapplication => "Reapplication",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Submission" => Some(ActionType::Submission),
            "DepartmentApprove" => Some(ActionType::DepartmentApprove),
            "DepartmentReject" => Some(ActionType::DepartmentReject),
            "Reapplication" => Some(ActionType::Reapplication),
            _ => None,
        }
    }
}

impl ActionLog {
    /// 创建新的操作日志
    pub fn new(form_id: &str, action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            form_id: Some(form_id.to_string()),
            action_type: action_type.as_str().to_string(),
            action_ts: Utc::now(),
            actor: actor.to_string(),
            department_name: None,
            payload_json: None,
            detail: None,
        }
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    /// 设置涉及部门
    pub fn with_department(mut self, department_name: &str) -> Self {
        self.department_name = Some(department_name.to_string());
        self
    }

    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }

    /// 解析后的操作类型（未知类型返回 None）
    pub fn parsed_type(&self) -> Option<ActionType> {
        ActionType::from_str(&self.action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_fills_optional_fields() {
        let log = ActionLog::new("F1", ActionType::DepartmentReject, "warden")
            .with_department("hostel")
            .with_payload(&json!({ "reason": "fees due" }))
            .with_detail("hostel rejected".to_string());

        assert_eq!(log.parsed_type(), Some(ActionType::DepartmentReject));
        assert_eq!(log.department_name.as_deref(), Some("hostel"));
        assert_eq!(log.payload_json.unwrap()["reason"], "fees due");
        assert_eq!(log.action_id.len(), 36);
    }
}
