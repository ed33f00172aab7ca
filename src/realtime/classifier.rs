// ==========================================
// 离校手续审批系统 - 变更事件分类器
// ==========================================
// 职责: 原始 ChangeEvent → 封闭集合 ClassifiedEvent（一进一出）
// 红线: 无法识别的形态直接拒绝,不做猜测
// 红线: 分类器不做批处理,批处理由下游看板负责
// ==========================================

use crate::domain::types::{ApprovalState, FormStatus};
use crate::engine::events::{ChangeEvent, ChangeKind, ChangeTable, RowImage};
use crate::realtime::error::ClassifyError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ==========================================
// ClassifiedEvent - 语义事件
// ==========================================
// 只携带非敏感的聚合信号（不含学号/驳回原因）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassifiedEvent {
    NewSubmission {
        form_id: String,
    },
    DepartmentAction {
        form_id: String,
        department: String,
        new_status: ApprovalState,
    },
    Completion {
        form_id: String,
    },
    Reapplication {
        form_id: String,
        department: String,
    },
}

impl ClassifiedEvent {
    pub fn form_id(&self) -> &str {
        match self {
            ClassifiedEvent::NewSubmission { form_id }
            | ClassifiedEvent::DepartmentAction { form_id, .. }
            | ClassifiedEvent::Completion { form_id }
            | ClassifiedEvent::Reapplication { form_id, .. } => form_id,
        }
    }

    /// 受影响部门（仅部门级事件）
    pub fn department(&self) -> Option<&str> {
        match self {
            ClassifiedEvent::DepartmentAction { department, .. }
            | ClassifiedEvent::Reapplication { department, .. } => Some(department),
            ClassifiedEvent::NewSubmission { .. } | ClassifiedEvent::Completion { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedEvent::NewSubmission { .. } => "NewSubmission",
            ClassifiedEvent::DepartmentAction { .. } => "DepartmentAction",
            ClassifiedEvent::Completion { .. } => "Completion",
            ClassifiedEvent::Reapplication { .. } => "Reapplication",
        }
    }
}

impl fmt::Display for ClassifiedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.department() {
            Some(department) => write!(f, "{}({}, {})", self.kind(), self.form_id(), department),
            None => write!(f, "{}({})", self.kind(), self.form_id()),
        }
    }
}

// ==========================================
// ChangeClassifier
// ==========================================
// 再申请识别: 表单 reapplication_count 增加 → 记一次额度；
// 部门 rejected → pending 消耗一次额度 → Reapplication
#[derive(Debug, Default)]
pub struct ChangeClassifier {
    credits: HashMap<String, u32>,
}

impl ChangeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该表单尚未消耗的再申请额度
    pub fn pending_credits(&self, form_id: &str) -> u32 {
        self.credits.get(form_id).copied().unwrap_or(0)
    }

    pub fn classify(&mut self, event: &ChangeEvent) -> Result<ClassifiedEvent, ClassifyError> {
        match (event.table, event.kind, &event.before, &event.after) {
            // ===== 表单 =====
            (ChangeTable::Forms, ChangeKind::Insert, None, Some(RowImage::Form(form))) => {
                Ok(ClassifiedEvent::NewSubmission {
                    form_id: form.id.clone(),
                })
            }
            (
                ChangeTable::Forms,
                ChangeKind::Update,
                Some(RowImage::Form(before)),
                Some(RowImage::Form(after)),
            ) => {
                if before.id != after.id {
                    return Err(unrecognized(event, "表单 id 前后不一致"));
                }
                if after.reapplication_count > before.reapplication_count {
                    let added = (after.reapplication_count - before.reapplication_count) as u32;
                    *self.credits.entry(after.id.clone()).or_insert(0) += added;
                }
                if after.status == FormStatus::Completed && before.status != FormStatus::Completed {
                    return Ok(ClassifiedEvent::Completion {
                        form_id: after.id.clone(),
                    });
                }
                Err(no_semantic_change(event))
            }

            // ===== 部门状态 =====
            (
                ChangeTable::DepartmentStatuses,
                ChangeKind::Insert,
                None,
                Some(RowImage::DepartmentStatus(_)),
            ) => Err(no_semantic_change(event)),
            (
                ChangeTable::DepartmentStatuses,
                ChangeKind::Update,
                Some(RowImage::DepartmentStatus(before)),
                Some(RowImage::DepartmentStatus(after)),
            ) => {
                if before.id != after.id || before.form_id != after.form_id {
                    return Err(unrecognized(event, "部门状态行标识前后不一致"));
                }

                match (before.status, after.status) {
                    (_, ApprovalState::Approved | ApprovalState::Rejected) => {
                        Ok(ClassifiedEvent::DepartmentAction {
                            form_id: after.form_id.clone(),
                            department: after.department_name.clone(),
                            new_status: after.status,
                        })
                    }
                    (ApprovalState::Rejected, ApprovalState::Pending) => {
                        if self.consume_credit(&after.form_id) {
                            Ok(ClassifiedEvent::Reapplication {
                                form_id: after.form_id.clone(),
                                department: after.department_name.clone(),
                            })
                        } else {
                            Err(unrecognized(event, "部门回到 pending 但表单再申请次数未增加"))
                        }
                    }
                    (ApprovalState::Pending, ApprovalState::Pending) => Err(no_semantic_change(event)),
                    (ApprovalState::Approved, ApprovalState::Pending) => {
                        Err(unrecognized(event, "已通过的部门不能回到 pending"))
                    }
                }
            }

            // ===== 再申请历史 =====
            (
                ChangeTable::ReapplicationHistory,
                ChangeKind::Insert,
                None,
                Some(RowImage::ReapplicationHistory(_)),
            ) => Err(no_semantic_change(event)),

            _ => Err(unrecognized(event, &describe_images(event))),
        }
    }

    fn consume_credit(&mut self, form_id: &str) -> bool {
        match self.credits.get_mut(form_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.credits.remove(form_id);
                }
                true
            }
            _ => false,
        }
    }
}

fn unrecognized(event: &ChangeEvent, detail: &str) -> ClassifyError {
    ClassifyError::Unrecognized {
        kind: event.kind,
        table: event.table,
        detail: detail.to_string(),
    }
}

fn no_semantic_change(event: &ChangeEvent) -> ClassifyError {
    ClassifyError::NoSemanticChange {
        kind: event.kind,
        table: event.table,
    }
}

fn describe_images(event: &ChangeEvent) -> String {
    let name = |image: &Option<RowImage>| image.as_ref().map(|i| i.name()).unwrap_or("none");
    format!("before={}, after={}", name(&event.before), name(&event.after))
}
