use super::SqliteWorkflowStore;
use crate::domain::action_log::ActionType;
use crate::domain::form::NewForm;
use crate::domain::types::{ApprovalState, FormStatus};
use crate::engine::events::{ChangeKind, ChangeTable, RowImage};
use crate::repository::error::RepositoryError;
use crate::repository::workflow_store::{FormQuery, WorkflowStore};
use chrono::Utc;

fn new_form(registration_no: &str, departments: &[&str]) -> NewForm {
    NewForm {
        registration_no: registration_no.to_string(),
        departments: departments.iter().map(|d| d.to_string()).collect(),
        certificate: None,
    }
}

#[test]
fn test_create_form_inserts_pending_rows() {
    let store = SqliteWorkflowStore::open_in_memory().unwrap();
    let snapshot = store
        .create_form(&new_form("21CS001", &["library", "hostel", "accounts"]))
        .unwrap();

    assert_eq!(snapshot.form.status, FormStatus::Pending);
    let statuses = store.get_department_statuses(&snapshot.form.id).unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s.status == ApprovalState::Pending));

    let by_reg = store.find_form_by_registration("21CS001").unwrap().unwrap();
    assert_eq!(by_reg.id, snapshot.form.id);

    let logs = store.list_action_logs(&snapshot.form.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].parsed_type(), Some(ActionType::Submission));
}

#[test]
fn test_create_form_rejects_bad_input() {
    let store = SqliteWorkflowStore::open_in_memory().unwrap();

    let empty = store.create_form(&new_form("21CS001", &[]));
    assert!(matches!(empty, Err(RepositoryError::ValidationError(_))));

    let duplicated = store.create_form(&new_form("21CS001", &["library", "library"]));
    assert!(matches!(duplicated, Err(RepositoryError::ValidationError(_))));

    store.create_form(&new_form("21CS001", &["library"])).unwrap();
    let again = store.create_form(&new_form("21CS001", &["library"]));
    assert!(matches!(again, Err(RepositoryError::UniqueConstraintViolation(_))));
}

#[test]
fn test_commit_publishes_in_write_order() {
    let store = SqliteWorkflowStore::open_in_memory().unwrap();
    let snapshot = store.create_form(&new_form("21CS002", &["library"])).unwrap();
    let mut feed = store.subscribe_changes(&[ChangeTable::Forms, ChangeTable::DepartmentStatuses]);

    let mut status = snapshot.department("library").unwrap().clone();
    status.status = ApprovalState::Approved;
    status.action_at = Some(Utc::now());
    status.action_by = Some("librarian".to_string());

    let mut unit = store.begin().unwrap();
    unit.write_department_status(&status).unwrap();
    unit.write_form_status(&snapshot.form.id, FormStatus::Completed).unwrap();
    let events = unit.commit().unwrap();
    assert_eq!(events.len(), 2);

    let first = feed.try_recv().unwrap();
    assert_eq!(first.table, ChangeTable::DepartmentStatuses);
    assert_eq!(first.kind, ChangeKind::Update);
    match (first.before, first.after) {
        (Some(RowImage::DepartmentStatus(before)), Some(RowImage::DepartmentStatus(after))) => {
            assert_eq!(before.status, ApprovalState::Pending);
            assert_eq!(after.status, ApprovalState::Approved);
        }
        other => panic!("unexpected images: {:?}", other),
    }

    let second = feed.try_recv().unwrap();
    assert_eq!(second.table, ChangeTable::Forms);
    assert!(feed.try_recv().is_none());
}

#[test]
fn test_dropped_unit_rolls_back_silently() {
    let store = SqliteWorkflowStore::open_in_memory().unwrap();
    let snapshot = store.create_form(&new_form("21CS003", &["hostel"])).unwrap();
    let mut feed = store.subscribe_changes(&[ChangeTable::Forms, ChangeTable::DepartmentStatuses]);

    {
        let mut unit = store.begin().unwrap();
        unit.write_form_status(&snapshot.form.id, FormStatus::Rejected).unwrap();
    }

    let form = store.get_form(&snapshot.form.id).unwrap().unwrap();
    assert_eq!(form.status, FormStatus::Pending);
    assert!(feed.try_recv().is_none());
}

#[test]
fn test_snapshot_query_by_department_status() {
    let store = SqliteWorkflowStore::open_in_memory().unwrap();
    let a = store.create_form(&new_form("21CS010", &["library", "hostel"])).unwrap();
    store.create_form(&new_form("21CS011", &["library", "hostel"])).unwrap();

    let mut hostel = a.department("hostel").unwrap().clone();
    hostel.status = ApprovalState::Approved;
    hostel.action_at = Some(Utc::now());
    let mut unit = store.begin().unwrap();
    unit.write_department_status(&hostel).unwrap();
    unit.commit().unwrap();

    let pending_hostel = store
        .list_form_snapshots(&FormQuery {
            department: Some("hostel".to_string()),
            department_status: Some(ApprovalState::Pending),
            ..FormQuery::default()
        })
        .unwrap();
    assert_eq!(pending_hostel.len(), 1);
    assert_eq!(pending_hostel[0].form.registration_no, "21CS011");

    let all = store.list_form_snapshots(&FormQuery::all()).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|s| s.departments.len() == 2));
}
