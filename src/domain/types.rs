// ==========================================
// 离校手续审批系统 - 领域类型定义
// ==========================================
// 职责: 表单状态、部门审批状态、部门决定
// 序列化格式: lowercase (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 表单总体状态 (Form Status)
// ==========================================
// 红线: 只能由部门状态全集推导,不允许直接写入业务值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Pending,   // 审批中
    Rejected,  // 至少一个部门驳回
    Completed, // 全部部门通过
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormStatus::Pending => "pending",
            FormStatus::Rejected => "rejected",
            FormStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FormStatus::Pending),
            "rejected" => Some(FormStatus::Rejected),
            "completed" => Some(FormStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for FormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 部门审批状态 (Approval State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,  // 待审批
    Approved, // 已通过
    Rejected, // 已驳回
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalState::Pending),
            "approved" => Some(ApprovalState::Approved),
            "rejected" => Some(ApprovalState::Rejected),
            _ => None,
        }
    }

    /// 是否为终态（通过/驳回）
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::Rejected)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 部门决定 (Department Decision)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepartmentDecision {
    Approve,
    Reject,
}

impl DepartmentDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepartmentDecision::Approve => "approve",
            DepartmentDecision::Reject => "reject",
        }
    }

    /// 决定对应的目标审批状态
    pub fn target_state(&self) -> ApprovalState {
        match self {
            DepartmentDecision::Approve => ApprovalState::Approved,
            DepartmentDecision::Reject => ApprovalState::Rejected,
        }
    }
}

impl fmt::Display for DepartmentDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [FormStatus::Pending, FormStatus::Rejected, FormStatus::Completed] {
            assert_eq!(FormStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(FormStatus::from_str("reapplied"), None);
        assert_eq!(ApprovalState::from_str("in_progress"), None);
    }

    #[test]
    fn test_decision_target_state() {
        assert_eq!(DepartmentDecision::Approve.target_state(), ApprovalState::Approved);
        assert_eq!(DepartmentDecision::Reject.target_state(), ApprovalState::Rejected);
        assert!(ApprovalState::Rejected.is_terminal());
        assert!(!ApprovalState::Pending.is_terminal());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&ApprovalState::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
    }
}
