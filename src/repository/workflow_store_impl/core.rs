use super::rows;
use super::unit::SqliteWorkflowUnit;
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::form::{DepartmentStatus, Form, FormSnapshot, NewForm, ReapplicationHistoryEntry};
use crate::domain::types::FormStatus;
use crate::engine::events::{ChangeFeed, ChangeNotifier, ChangeTable};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::workflow_store::{FormQuery, WorkflowStore, WorkflowUnit};
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, Result as SqliteResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// SqliteWorkflowStore - 审批流存储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct SqliteWorkflowStore {
    conn: Arc<Mutex<Connection>>,
    notifier: ChangeNotifier,
}

impl SqliteWorkflowStore {
    /// 从共享连接创建（连接需已完成 schema 初始化）
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            notifier: ChangeNotifier::new(),
        }
    }

    /// 打开数据库文件并确保表结构存在
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        crate::db::ensure_workflow_schema(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// 内存数据库（测试与演示用）
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        configure_sqlite_connection(&conn)?;
        crate::db::ensure_workflow_schema(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// 共享连接（供 ConfigManager 复用）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn validate_new_form(new_form: &NewForm) -> RepositoryResult<()> {
        if new_form.registration_no.trim().is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "registration_no".to_string(),
                message: "学号不能为空".to_string(),
            });
        }
        if new_form.departments.is_empty() {
            return Err(RepositoryError::ValidationError("部门列表不能为空".to_string()));
        }

        let mut seen = HashSet::new();
        for department in &new_form.departments {
            if department.trim().is_empty() {
                return Err(RepositoryError::ValidationError("部门名称不能为空".to_string()));
            }
            if !seen.insert(department.as_str()) {
                return Err(RepositoryError::ValidationError(format!(
                    "部门重复: {}",
                    department
                )));
            }
        }
        Ok(())
    }

    fn query_snapshots(conn: &Connection, query: &FormQuery) -> SqliteResult<Vec<FormSnapshot>> {
        let mut sql = format!("SELECT {} FROM no_dues_forms f WHERE 1 = 1", rows::FORM_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(form_id) = &query.form_id {
            sql.push_str(" AND f.id = ?");
            args.push(form_id.clone());
        }
        if let Some(status) = query.form_status {
            sql.push_str(" AND f.status = ?");
            args.push(status.as_str().to_string());
        }
        match (&query.department, query.department_status) {
            (Some(department), Some(status)) => {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM no_dues_status s \
                     WHERE s.form_id = f.id AND s.department_name = ? AND s.status = ?)",
                );
                args.push(department.clone());
                args.push(status.as_str().to_string());
            }
            (Some(department), None) => {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM no_dues_status s \
                     WHERE s.form_id = f.id AND s.department_name = ?)",
                );
                args.push(department.clone());
            }
            (None, Some(status)) => {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM no_dues_status s \
                     WHERE s.form_id = f.id AND s.status = ?)",
                );
                args.push(status.as_str().to_string());
            }
            (None, None) => {}
        }
        sql.push_str(" ORDER BY f.created_at DESC, f.id");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let forms = stmt
            .query_map(params_from_iter(args.iter()), rows::map_form)?
            .collect::<SqliteResult<Vec<Form>>>()?;

        forms
            .into_iter()
            .map(|form| -> SqliteResult<FormSnapshot> {
                let departments = rows::query_department_statuses(conn, &form.id)?;
                Ok(FormSnapshot { form, departments })
            })
            .collect()
    }
}

impl WorkflowStore for SqliteWorkflowStore {
    fn begin(&self) -> RepositoryResult<Box<dyn WorkflowUnit + '_>> {
        let conn = self.get_conn()?;
        let unit = SqliteWorkflowUnit::begin(conn, &self.notifier)?;
        Ok(Box::new(unit))
    }

    fn create_form(&self, new_form: &NewForm) -> RepositoryResult<FormSnapshot> {
        Self::validate_new_form(new_form)?;

        let now = Utc::now();
        let form = Form {
            id: uuid::Uuid::new_v4().to_string(),
            registration_no: new_form.registration_no.trim().to_string(),
            status: FormStatus::Pending,
            reapplication_count: 0,
            last_reapplied_at: None,
            certificate: new_form.certificate.clone(),
            created_at: now,
            updated_at: now,
        };
        let departments: Vec<DepartmentStatus> = new_form
            .departments
            .iter()
            .map(|name| DepartmentStatus::pending(&form.id, name.trim(), now))
            .collect();

        let conn = self.get_conn()?;
        let mut unit = SqliteWorkflowUnit::begin(conn, &self.notifier)?;
        unit.insert_form(&form)?;
        for status in &departments {
            unit.insert_department_status(status)?;
        }
        unit.append_action_log(
            &ActionLog::new(&form.id, ActionType::Submission, &form.registration_no)
                .with_payload(&new_form.departments),
        )?;
        Box::new(unit).commit()?;

        tracing::info!(
            form_id = %form.id,
            registration_no = %form.registration_no,
            departments = departments.len(),
            "表单已提交"
        );

        Ok(FormSnapshot { form, departments })
    }

    fn get_form(&self, form_id: &str) -> RepositoryResult<Option<Form>> {
        let conn = self.get_conn()?;
        Ok(rows::query_form(&conn, form_id)?)
    }

    fn find_form_by_registration(&self, registration_no: &str) -> RepositoryResult<Option<Form>> {
        let conn = self.get_conn()?;
        Ok(rows::query_form_by_registration(&conn, registration_no)?)
    }

    fn get_department_statuses(&self, form_id: &str) -> RepositoryResult<Vec<DepartmentStatus>> {
        let conn = self.get_conn()?;
        Ok(rows::query_department_statuses(&conn, form_id)?)
    }

    fn list_form_snapshots(&self, query: &FormQuery) -> RepositoryResult<Vec<FormSnapshot>> {
        let conn = self.get_conn()?;
        Ok(Self::query_snapshots(&conn, query)?)
    }

    fn list_reapplication_history(&self, form_id: &str) -> RepositoryResult<Vec<ReapplicationHistoryEntry>> {
        let conn = self.get_conn()?;
        Ok(rows::query_history(&conn, form_id)?)
    }

    fn list_action_logs(&self, form_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        Ok(rows::query_action_logs(&conn, form_id)?)
    }

    fn subscribe_changes(&self, tables: &[ChangeTable]) -> ChangeFeed {
        self.notifier.subscribe(tables)
    }
}
