use super::rows;
use crate::domain::action_log::ActionLog;
use crate::domain::form::{DepartmentStatus, Form, ReapplicationHistoryEntry};
use crate::domain::types::FormStatus;
use crate::engine::events::{ChangeEvent, ChangeNotifier, ChangeTable, RowImage};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::workflow_store::WorkflowUnit;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::MutexGuard;

// ==========================================
// SqliteWorkflowUnit - SQLite 工作单元
// ==========================================
// 持有连接锁直到 commit 或 drop
pub struct SqliteWorkflowUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    notifier: &'a ChangeNotifier,
    pending: Vec<ChangeEvent>,
    finished: bool,
}

impl<'a> SqliteWorkflowUnit<'a> {
    /// 开启 IMMEDIATE 事务（立即获取写锁，避免读后升级冲突）
    pub(super) fn begin(
        conn: MutexGuard<'a, Connection>,
        notifier: &'a ChangeNotifier,
    ) -> RepositoryResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        Ok(Self {
            conn,
            notifier,
            pending: Vec::new(),
            finished: false,
        })
    }

    fn require_form(&self, form_id: &str) -> RepositoryResult<Form> {
        rows::query_form(&self.conn, form_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "Form".to_string(),
            id: form_id.to_string(),
        })
    }

    /// 插入表单（仅供 create_form 使用）
    pub(super) fn insert_form(&mut self, form: &Form) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO no_dues_forms (
                id, registration_no, status, reapplication_count,
                last_reapplied_at, certificate_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                form.id,
                form.registration_no,
                form.status,
                form.reapplication_count,
                form.last_reapplied_at,
                form.certificate.as_ref().map(|v| v.to_string()),
                form.created_at,
                form.updated_at,
            ],
        )?;

        self.pending
            .push(ChangeEvent::insert(ChangeTable::Forms, RowImage::Form(form.clone())));
        Ok(())
    }

    /// 插入部门状态（仅供 create_form 使用）
    pub(super) fn insert_department_status(&mut self, status: &DepartmentStatus) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO no_dues_status (
                id, form_id, department_name, status, action_at,
                action_by, rejection_reason, rejection_count, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                status.id,
                status.form_id,
                status.department_name,
                status.status,
                status.action_at,
                status.action_by,
                status.rejection_reason,
                status.rejection_count,
                status.updated_at,
            ],
        )?;

        self.pending.push(ChangeEvent::insert(
            ChangeTable::DepartmentStatuses,
            RowImage::DepartmentStatus(status.clone()),
        ));
        Ok(())
    }

    fn record_form_update(&mut self, before: Form) -> RepositoryResult<()> {
        let after = self.require_form(&before.id)?;
        self.pending.push(ChangeEvent::update(
            ChangeTable::Forms,
            RowImage::Form(before),
            RowImage::Form(after),
        ));
        Ok(())
    }
}

impl<'a> WorkflowUnit for SqliteWorkflowUnit<'a> {
    fn get_form(&mut self, form_id: &str) -> RepositoryResult<Option<Form>> {
        Ok(rows::query_form(&self.conn, form_id)?)
    }

    fn get_department_statuses(&mut self, form_id: &str) -> RepositoryResult<Vec<DepartmentStatus>> {
        Ok(rows::query_department_statuses(&self.conn, form_id)?)
    }

    fn write_department_status(&mut self, status: &DepartmentStatus) -> RepositoryResult<()> {
        let before = rows::query_department_status(&self.conn, &status.id)?.ok_or_else(|| {
            RepositoryError::NotFound {
                entity: "DepartmentStatus".to_string(),
                id: status.id.clone(),
            }
        })?;

        if before.form_id != status.form_id || before.department_name != status.department_name {
            return Err(RepositoryError::ValidationError(format!(
                "部门状态 {} 不允许更换所属表单或部门",
                status.id
            )));
        }

        self.conn.execute(
            r#"
            UPDATE no_dues_status
            SET status = ?2, action_at = ?3, action_by = ?4,
                rejection_reason = ?5, rejection_count = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                status.id,
                status.status,
                status.action_at,
                status.action_by,
                status.rejection_reason,
                status.rejection_count,
                status.updated_at,
            ],
        )?;

        let after = rows::query_department_status(&self.conn, &status.id)?.ok_or_else(|| {
            RepositoryError::InternalError(format!("部门状态 {} 写入后不可见", status.id))
        })?;

        self.pending.push(ChangeEvent::update(
            ChangeTable::DepartmentStatuses,
            RowImage::DepartmentStatus(before),
            RowImage::DepartmentStatus(after),
        ));
        Ok(())
    }

    fn write_form_status(&mut self, form_id: &str, status: FormStatus) -> RepositoryResult<()> {
        let before = self.require_form(form_id)?;

        self.conn.execute(
            "UPDATE no_dues_forms SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![form_id, status, Utc::now()],
        )?;

        self.record_form_update(before)
    }

    fn write_form_reapplication(
        &mut self,
        form_id: &str,
        reapplication_count: i32,
        reapplied_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let before = self.require_form(form_id)?;

        self.conn.execute(
            r#"
            UPDATE no_dues_forms
            SET reapplication_count = ?2, last_reapplied_at = ?3, updated_at = ?3
            WHERE id = ?1
            "#,
            params![form_id, reapplication_count, reapplied_at],
        )?;

        self.record_form_update(before)
    }

    fn append_reapplication_history(&mut self, entry: &ReapplicationHistoryEntry) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO no_dues_reapplication_history (
                id, form_id, reapplication_number, department_name,
                rejection_reason, rejected_by, rejected_at, student_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id,
                entry.form_id,
                entry.reapplication_number,
                entry.department_name,
                entry.rejection.reason,
                entry.rejection.rejected_by,
                entry.rejection.rejected_at,
                entry.student_message,
                entry.created_at,
            ],
        )?;

        self.pending.push(ChangeEvent::insert(
            ChangeTable::ReapplicationHistory,
            RowImage::ReapplicationHistory(entry.clone()),
        ));
        Ok(())
    }

    fn append_action_log(&mut self, log: &ActionLog) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO action_log (
                action_id, form_id, action_type, action_ts, actor,
                department_name, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                log.action_id,
                log.form_id,
                log.action_type,
                log.action_ts,
                log.actor,
                log.department_name,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> RepositoryResult<Vec<ChangeEvent>> {
        self.finished = true;

        if let Err(e) = self.conn.execute_batch("COMMIT") {
            tracing::error!(error = %e, "工作单元提交失败，回滚");
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(RepositoryError::DatabaseTransactionError(e.to_string()));
        }

        let events = std::mem::take(&mut self.pending);
        self.notifier.notify(&events);
        tracing::debug!(events = events.len(), "工作单元已提交");
        Ok(events)
    }
}

impl<'a> Drop for SqliteWorkflowUnit<'a> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %e, "工作单元回滚失败");
        } else {
            tracing::debug!(discarded = self.pending.len(), "工作单元未提交，已回滚");
        }
    }
}
