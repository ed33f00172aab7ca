use crate::domain::action_log::ActionLog;
use crate::domain::form::{DepartmentStatus, Form, ReapplicationHistoryEntry, RejectionSnapshot};
use crate::domain::types::{ApprovalState, FormStatus};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use serde_json::Value as JsonValue;

// ==========================================
// 枚举 <-> TEXT 列
// ==========================================

impl ToSql for FormStatus {
    fn to_sql(&self) -> SqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FormStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        FormStatus::from_str(raw)
            .ok_or_else(|| FromSqlError::Other(format!("未知表单状态: {}", raw).into()))
    }
}

impl ToSql for ApprovalState {
    fn to_sql(&self) -> SqliteResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ApprovalState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ApprovalState::from_str(raw)
            .ok_or_else(|| FromSqlError::Other(format!("未知审批状态: {}", raw).into()))
    }
}

fn json_column(row: &Row, idx: usize) -> SqliteResult<Option<JsonValue>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ==========================================
// 行映射
// ==========================================

pub(super) const FORM_COLUMNS: &str = "id, registration_no, status, reapplication_count, \
     last_reapplied_at, certificate_json, created_at, updated_at";

pub(super) const STATUS_COLUMNS: &str = "id, form_id, department_name, status, action_at, \
     action_by, rejection_reason, rejection_count, updated_at";

const HISTORY_COLUMNS: &str = "id, form_id, reapplication_number, department_name, \
     rejection_reason, rejected_by, rejected_at, student_message, created_at";

const ACTION_LOG_COLUMNS: &str = "action_id, form_id, action_type, action_ts, actor, \
     department_name, payload_json, detail";

pub(super) fn map_form(row: &Row) -> SqliteResult<Form> {
    Ok(Form {
        id: row.get(0)?,
        registration_no: row.get(1)?,
        status: row.get(2)?,
        reapplication_count: row.get(3)?,
        last_reapplied_at: row.get(4)?,
        certificate: json_column(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(super) fn map_department_status(row: &Row) -> SqliteResult<DepartmentStatus> {
    Ok(DepartmentStatus {
        id: row.get(0)?,
        form_id: row.get(1)?,
        department_name: row.get(2)?,
        status: row.get(3)?,
        action_at: row.get(4)?,
        action_by: row.get(5)?,
        rejection_reason: row.get(6)?,
        rejection_count: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_history(row: &Row) -> SqliteResult<ReapplicationHistoryEntry> {
    let department_name: String = row.get(3)?;
    Ok(ReapplicationHistoryEntry {
        id: row.get(0)?,
        form_id: row.get(1)?,
        reapplication_number: row.get(2)?,
        rejection: RejectionSnapshot {
            department_name: department_name.clone(),
            reason: row.get(4)?,
            rejected_by: row.get(5)?,
            rejected_at: row.get(6)?,
        },
        department_name,
        student_message: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_action_log(row: &Row) -> SqliteResult<ActionLog> {
    Ok(ActionLog {
        action_id: row.get(0)?,
        form_id: row.get(1)?,
        action_type: row.get(2)?,
        action_ts: row.get(3)?,
        actor: row.get(4)?,
        department_name: row.get(5)?,
        payload_json: json_column(row, 6)?,
        detail: row.get(7)?,
    })
}

// ==========================================
// 查询（仓储与工作单元共用）
// ==========================================

pub(super) fn query_form(conn: &Connection, form_id: &str) -> SqliteResult<Option<Form>> {
    conn.query_row(
        &format!("SELECT {} FROM no_dues_forms WHERE id = ?1", FORM_COLUMNS),
        params![form_id],
        map_form,
    )
    .optional()
}

pub(super) fn query_form_by_registration(
    conn: &Connection,
    registration_no: &str,
) -> SqliteResult<Option<Form>> {
    conn.query_row(
        &format!("SELECT {} FROM no_dues_forms WHERE registration_no = ?1", FORM_COLUMNS),
        params![registration_no],
        map_form,
    )
    .optional()
}

pub(super) fn query_department_status(
    conn: &Connection,
    status_id: &str,
) -> SqliteResult<Option<DepartmentStatus>> {
    conn.query_row(
        &format!("SELECT {} FROM no_dues_status WHERE id = ?1", STATUS_COLUMNS),
        params![status_id],
        map_department_status,
    )
    .optional()
}

pub(super) fn query_department_statuses(
    conn: &Connection,
    form_id: &str,
) -> SqliteResult<Vec<DepartmentStatus>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM no_dues_status WHERE form_id = ?1 ORDER BY department_name",
        STATUS_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![form_id], map_department_status)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

pub(super) fn query_history(
    conn: &Connection,
    form_id: &str,
) -> SqliteResult<Vec<ReapplicationHistoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM no_dues_reapplication_history WHERE form_id = ?1 \
         ORDER BY reapplication_number",
        HISTORY_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![form_id], map_history)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

pub(super) fn query_action_logs(conn: &Connection, form_id: &str) -> SqliteResult<Vec<ActionLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM action_log WHERE form_id = ?1 ORDER BY action_ts, rowid",
        ACTION_LOG_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![form_id], map_action_log)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}
