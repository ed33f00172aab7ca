// ==========================================
// 实时同步链路测试
// ==========================================
// 职责: 存储提交 → 桥接分类 → 广播 → 看板刷新协调器 的端到端验证
// ==========================================


#[cfg(test)]
mod realtime_pipeline_test {
    use futures::future::join_all;
    use no_dues_sync::app::AppState;
    use no_dues_sync::config::{config_keys, ConfigManager};
    use no_dues_sync::domain::types::{ApprovalState, DepartmentDecision, FormStatus};
    use no_dues_sync::realtime::{
        ClassifiedEvent, DashboardScope, Delivery, RealtimeBridge, RealtimeChannel, RealtimeSubscription,
        ViewFilter, ViewState, ViewUpdate,
    };
    use no_dues_sync::config::WorkflowRules;
    use no_dues_sync::repository::WorkflowStore;
    use no_dues_sync::WorkflowApi;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    use crate::test_helpers::{create_test_db, departments, open_test_store};

    const WAIT: Duration = Duration::from_secs(5);

    // ==========================================
    // 测试辅助函数
    // ==========================================

    async fn next_event(subscription: &mut RealtimeSubscription) -> ClassifiedEvent {
        match timeout(WAIT, subscription.recv()).await {
            Ok(Delivery::Event(envelope)) => envelope.event,
            Ok(other) => panic!("Expected event, got {:?}", other),
            Err(_) => panic!("等待广播事件超时"),
        }
    }

    /// 等待满足条件的视图更新
    async fn wait_for_update<F>(updates: &mut broadcast::Receiver<ViewUpdate>, mut predicate: F) -> ViewUpdate
    where
        F: FnMut(&ViewUpdate) -> bool,
    {
        let result = timeout(WAIT, async {
            loop {
                match updates.recv().await {
                    Ok(update) if predicate(&update) => return update,
                    Ok(_) => continue,
                    Err(e) => panic!("视图更新通道异常: {}", e),
                }
            }
        })
        .await;

        match result {
            Ok(update) => update,
            Err(_) => panic!("等待视图更新超时"),
        }
    }

    /// 使用短防抖窗口的应用状态
    fn app_state_with_fast_debounce(db_path: &str) -> AppState {
        let config = ConfigManager::new(db_path).unwrap();
        config.set_global_config_value(config_keys::DEBOUNCE_MS, "50").unwrap();
        config.set_global_config_value(config_keys::REFRESH_TIMEOUT_MS, "5000").unwrap();
        AppState::new(db_path.to_string()).unwrap()
    }

    // ==========================================
    // 桥接 + 分类
    // ==========================================

    #[tokio::test]
    async fn test_bridge_classifies_committed_changes() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let store = open_test_store(&db_path);
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let channel = RealtimeChannel::new(64);
        let mut subscription = channel.subscribe();

        let bridge = RealtimeBridge::new(dyn_store.clone(), channel.clone());
        bridge.start();

        let api = WorkflowApi::new(dyn_store, WorkflowRules::default());
        let form = api.submit_form("21BCE3001", &departments(&["library", "hostel"]), None).unwrap();
        let form_id = form.form.id.clone();

        api.file_department_action(&form_id, "library", DepartmentDecision::Approve, None, "staff-lib")
            .unwrap();
        api.file_department_action(&form_id, "hostel", DepartmentDecision::Reject, Some("fees due"), "staff-hostel")
            .unwrap();
        api.file_reapplication(&form_id, "hostel", "fees paid at counter").unwrap();
        api.file_department_action(&form_id, "hostel", DepartmentDecision::Approve, None, "staff-hostel")
            .unwrap();

        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::NewSubmission { form_id: form_id.clone() }
        );
        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::DepartmentAction {
                form_id: form_id.clone(),
                department: "library".to_string(),
                new_status: ApprovalState::Approved,
            }
        );
        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::DepartmentAction {
                form_id: form_id.clone(),
                department: "hostel".to_string(),
                new_status: ApprovalState::Rejected,
            }
        );
        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::Reapplication {
                form_id: form_id.clone(),
                department: "hostel".to_string(),
            }
        );
        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::DepartmentAction {
                form_id: form_id.clone(),
                department: "hostel".to_string(),
                new_status: ApprovalState::Approved,
            }
        );
        assert_eq!(
            next_event(&mut subscription).await,
            ClassifiedEvent::Completion { form_id: form_id.clone() }
        );

        let status = bridge.status();
        assert_eq!(status.classified, 6);
        assert_eq!(status.rejected, 0);
        assert!(status.ignored > 0);

        bridge.stop().await;
        assert!(!bridge.status().running);
    }

    #[tokio::test]
    async fn test_rolled_back_action_publishes_nothing() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let store = open_test_store(&db_path);
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let channel = RealtimeChannel::new(16);

        let api = WorkflowApi::new(dyn_store.clone(), WorkflowRules::default());
        let form = api.submit_form("21BCE3002", &departments(&["library"]), None).unwrap();

        let bridge = RealtimeBridge::new(dyn_store, channel.clone());
        let mut subscription = channel.subscribe();
        bridge.start();

        // 驳回缺少原因 → 校验失败，不写入
        assert!(api
            .file_department_action(&form.form.id, "library", DepartmentDecision::Reject, None, "staff-lib")
            .is_err());
        // 未驳回的部门再申请 → 状态不满足，不写入
        assert!(api.file_reapplication(&form.form.id, "library", "please recheck").is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(subscription.try_recv().is_none());
        assert_eq!(channel.health().published, 0);

        bridge.stop().await;
    }

    // ==========================================
    // 看板刷新协调器
    // ==========================================

    #[tokio::test]
    async fn test_admin_dashboard_patches_department_action() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let state = app_state_with_fast_debounce(&db_path);

        // 先提交，再启动桥接：提交事件不进入看板
        let form = state
            .workflow_api
            .submit_form("21BCE3003", &departments(&["library", "hostel"]), None)
            .unwrap();
        let form_id = form.form.id.clone();

        state.start_realtime();
        let dashboard = state.open_dashboard(DashboardScope::Admin, ViewFilter::all());
        let mut updates = dashboard.subscribe();

        let initial = dashboard.refresh().await.unwrap();
        assert_eq!(initial.rows.len(), 1);
        assert!(!initial.stale);

        state
            .workflow_api
            .file_department_action(&form_id, "library", DepartmentDecision::Approve, None, "staff-lib")
            .unwrap();

        let update = wait_for_update(&mut updates, |u| matches!(u, ViewUpdate::Patched { .. })).await;
        let row = update.view().row(&form_id).unwrap();
        assert_eq!(row.departments.get("library"), Some(&ApprovalState::Approved));
        assert_eq!(row.form_status, FormStatus::Pending);

        // 补丁之后仍以防抖后的全量刷新为准
        let update = wait_for_update(&mut updates, |u| matches!(u, ViewUpdate::Refreshed(_))).await;
        let row = update.view().row(&form_id).unwrap();
        assert_eq!(row.departments.get("library"), Some(&ApprovalState::Approved));

        let stats = dashboard.stats();
        assert_eq!(stats.fetches_started, 2);
        assert_eq!(stats.patches_applied, 1);

        dashboard.stop().await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_staff_pending_tab_refetches_when_row_leaves_filter() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let state = app_state_with_fast_debounce(&db_path);
        state.start_realtime();

        let dashboard = state.open_dashboard(
            DashboardScope::Staff {
                department: "library".to_string(),
            },
            ViewFilter::pending_department(),
        );
        let mut updates = dashboard.subscribe();

        let first = state
            .workflow_api
            .submit_form("21BCE3004", &departments(&["library", "hostel"]), None)
            .unwrap();
        state
            .workflow_api
            .submit_form("21BCE3005", &departments(&["library"]), None)
            .unwrap();

        // 两次提交在防抖窗口内合并为一次刷新
        let update = wait_for_update(&mut updates, |u| {
            matches!(u, ViewUpdate::Refreshed(view) if view.rows.len() == 2)
        })
        .await;
        assert!(!update.view().stale);

        state
            .workflow_api
            .file_department_action(&first.form.id, "library", DepartmentDecision::Approve, None, "staff-lib")
            .unwrap();

        // 通过后该行离开 "待审批" 过滤条件 → 全量刷新
        let update = wait_for_update(&mut updates, |u| {
            matches!(u, ViewUpdate::Refreshed(view) if view.rows.len() == 1)
        })
        .await;
        let view: &ViewState = update.view();
        assert!(view.row(&first.form.id).is_none());

        let stats = dashboard.stats();
        assert_eq!(stats.patches_applied, 0);
        assert_eq!(stats.fetches_started, 2);

        dashboard.stop().await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_student_dashboard_ignores_other_forms() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let state = app_state_with_fast_debounce(&db_path);

        let mine = state
            .workflow_api
            .submit_form("21BCE3006", &departments(&["library"]), None)
            .unwrap();
        let other = state
            .workflow_api
            .submit_form("21BCE3007", &departments(&["library"]), None)
            .unwrap();

        state.start_realtime();
        let dashboard = state.open_dashboard(
            DashboardScope::Student {
                form_id: mine.form.id.clone(),
            },
            ViewFilter::all(),
        );
        let mut updates = dashboard.subscribe();
        dashboard.refresh().await.unwrap();

        state
            .workflow_api
            .file_department_action(&other.form.id, "library", DepartmentDecision::Approve, None, "staff-lib")
            .unwrap();
        state
            .workflow_api
            .file_department_action(&mine.form.id, "library", DepartmentDecision::Approve, None, "staff-lib")
            .unwrap();

        let update = wait_for_update(&mut updates, |u| matches!(u, ViewUpdate::Patched { .. })).await;
        let view = update.view();
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].form_id, mine.form.id);
        assert_eq!(view.rows[0].form_status, FormStatus::Completed);

        // 其他表单的审批与完成事件都被范围过滤
        let stats = dashboard.stats();
        assert!(stats.ignored_by_scope >= 2);

        dashboard.stop().await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_refresh_callers_share_one_fetch() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let state = app_state_with_fast_debounce(&db_path);
        state
            .workflow_api
            .submit_form("21BCE3008", &departments(&["library"]), None)
            .unwrap();

        let dashboard = state.open_dashboard(DashboardScope::Admin, ViewFilter::all());
        let results = join_all((0..5).map(|_| dashboard.refresh())).await;

        let views: Vec<Arc<ViewState>> = results.into_iter().map(|r| r.unwrap()).collect();
        assert!(views.iter().all(|v| Arc::ptr_eq(v, &views[0])));
        assert_eq!(views[0].rows.len(), 1);
        assert_eq!(dashboard.stats().fetches_started, 1);

        dashboard.stop().await;
    }
}
