// ==========================================
// 离校手续审批系统 - 看板刷新协调器
// ==========================================
// 职责: 每个看板一个实例；防抖合并突发事件、在途刷新去重、
//       行级补丁快速路径、超时保护
// 状态机: Idle → Debouncing → Fetching → Idle（由内部状态推导）
// 红线: 同一看板任意时刻最多一个在途刷新
// 红线: 新事件不取消已开始的刷新,其结果照常应用
// ==========================================

use crate::config::RealtimeConfig;
use crate::realtime::channel::{Delivery, RealtimeSubscription};
use crate::realtime::classifier::ClassifiedEvent;
use crate::realtime::error::RefreshError;
use crate::realtime::view::{DashboardScope, ViewFetcher, ViewFilter, ViewRow, ViewState, ViewUpdate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// 一次刷新的共享结果
pub type RefreshOutcome = Result<Arc<ViewState>, RefreshError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshPhase {
    Idle,
    Debouncing,
    Fetching,
}

/// 刷新触发来源（三者统一经过防抖 + 去重）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    Push,
    Manual,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 不属于本看板范围
    Ignored,
    /// 已本地补丁,同时安排全量刷新校正
    Patched,
    /// 补丁结果与当前视图一致（重复事件）
    Unchanged,
    /// 已安排全量刷新（防抖中）
    Scheduled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub events_received: u64,
    pub ignored_by_scope: u64,
    pub triggers: u64,
    pub fetches_started: u64,
    pub fetches_completed: u64,
    pub follow_ups: u64,
    pub patches_applied: u64,
    pub timeouts: u64,
    pub failures: u64,
}

enum PatchDecision {
    NotApplicable,
    Unchanged,
    Apply(ViewRow),
    LeavesFilter,
}

struct State {
    view: Arc<ViewState>,
    filter: ViewFilter,
    debounce_deadline: Option<Instant>,
    in_flight: Option<watch::Receiver<Option<RefreshOutcome>>>,
    /// 在途期间防抖到期 → 完成后补一次
    follow_up: bool,
    stats: CoordinatorStats,
}

struct Inner {
    scope: DashboardScope,
    config: RealtimeConfig,
    fetcher: Arc<dyn ViewFetcher>,
    state: Mutex<State>,
    updates: broadcast::Sender<ViewUpdate>,
    wakeup: Notify,
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// ==========================================
// RefreshCoordinator
// ==========================================
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
    running: Mutex<Option<RunningLoop>>,
}

impl RefreshCoordinator {
    pub fn new(
        scope: DashboardScope,
        filter: ViewFilter,
        config: RealtimeConfig,
        fetcher: Arc<dyn ViewFetcher>,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                scope,
                config,
                fetcher,
                state: Mutex::new(State {
                    view: Arc::new(ViewState::default()),
                    filter,
                    debounce_deadline: None,
                    in_flight: None,
                    follow_up: false,
                    stats: CoordinatorStats::default(),
                }),
                updates,
                wakeup: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &DashboardScope {
        &self.inner.scope
    }

    /// 启动事件循环（需在 Tokio 运行时内调用；已运行时为空操作）
    pub fn start(&self, subscription: RealtimeSubscription) {
        let mut running = lock_or_recover(&self.running);
        if running.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), subscription, shutdown_rx));
        *running = Some(RunningLoop { shutdown_tx, handle });

        tracing::info!(scope = %self.inner.scope, "看板刷新协调器已启动");
    }

    /// 停止事件循环；在途刷新不被取消
    pub async fn stop(&self) {
        let running = lock_or_recover(&self.running).take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(scope = %self.inner.scope, error = %e, "协调器事件循环异常退出");
        }
        self.inner.lock_state().debounce_deadline = None;

        tracing::info!(scope = %self.inner.scope, "看板刷新协调器已停止");
    }

    pub fn phase(&self) -> RefreshPhase {
        let state = self.inner.lock_state();
        if state.in_flight.is_some() {
            RefreshPhase::Fetching
        } else if state.debounce_deadline.is_some() {
            RefreshPhase::Debouncing
        } else {
            RefreshPhase::Idle
        }
    }

    /// 当前视图（最近一次成功刷新 + 后续补丁）
    pub fn view(&self) -> Arc<ViewState> {
        Arc::clone(&self.inner.lock_state().view)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.lock_state().stats.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.inner.updates.subscribe()
    }

    /// 立即刷新并等待结果；已有在途刷新时共享同一结果
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut rx = {
            let mut state = self.inner.lock_state();
            self.inner.request_fetch(&mut state)
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => match &*outcome {
                Some(result) => result.clone(),
                None => Err(RefreshError::Aborted("刷新结果缺失".to_string())),
            },
            Err(_) => Err(RefreshError::Aborted("刷新任务已退出".to_string())),
        };
        outcome
    }

    /// 外部触发（手动按钮 / 轮询 / 推送），统一进入防抖
    pub fn trigger(&self, source: TriggerSource) {
        self.inner.trigger(source);
    }

    /// 直接投递一个分类事件（事件循环同样经由此入口）
    pub fn ingest(&self, event: &ClassifiedEvent) -> IngestOutcome {
        self.inner.ingest(event)
    }

    /// 切换过滤条件并安排全量刷新
    pub fn set_filter(&self, filter: ViewFilter) {
        let mut state = self.inner.lock_state();
        if state.filter == filter {
            return;
        }
        state.filter = filter;
        if state.in_flight.is_some() {
            state.follow_up = true;
        } else {
            self.inner.start_fetch(&mut state);
        }
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        if let Some(running) = lock_or_recover(&self.running).take() {
            let _ = running.shutdown_tx.send(true);
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock_or_recover(&self.state)
    }

    /// (重新)开始防抖窗口
    fn arm_debounce(&self, state: &mut State) {
        state.debounce_deadline = Some(Instant::now() + self.config.debounce());
        self.wakeup.notify_one();
    }

    fn trigger(&self, source: TriggerSource) {
        let mut state = self.lock_state();
        state.stats.triggers += 1;
        tracing::debug!(scope = %self.scope, ?source, "刷新触发");
        self.arm_debounce(&mut state);
    }

    fn ingest(&self, event: &ClassifiedEvent) -> IngestOutcome {
        let mut state = self.lock_state();
        state.stats.events_received += 1;

        if !self.scope.accepts(event) {
            state.stats.ignored_by_scope += 1;
            return IngestOutcome::Ignored;
        }

        let decision = self.patch_decision(&state, event);
        match decision {
            PatchDecision::Unchanged => IngestOutcome::Unchanged,
            PatchDecision::Apply(row) => {
                let form_id = row.form_id.clone();
                let view = Arc::new(state.view.with_row(row));
                state.view = Arc::clone(&view);
                state.stats.patches_applied += 1;
                // 补丁只是提示,仍以防抖后的全量刷新为准
                self.schedule(&mut state);
                drop(state);

                let _ = self.updates.send(ViewUpdate::Patched {
                    form_id,
                    department: event.department().unwrap_or_default().to_string(),
                    view,
                });
                IngestOutcome::Patched
            }
            PatchDecision::LeavesFilter => {
                tracing::debug!(scope = %self.scope, event = %event, "补丁会移出当前过滤条件，改为全量刷新");
                self.schedule(&mut state)
            }
            PatchDecision::NotApplicable => self.schedule(&mut state),
        }
    }

    fn schedule(&self, state: &mut State) -> IngestOutcome {
        state.stats.triggers += 1;
        self.arm_debounce(state);
        IngestOutcome::Scheduled
    }

    fn patch_decision(&self, state: &State, event: &ClassifiedEvent) -> PatchDecision {
        if !self.config.targeted_patch {
            return PatchDecision::NotApplicable;
        }
        let ClassifiedEvent::DepartmentAction {
            form_id,
            department,
            new_status,
        } = event
        else {
            return PatchDecision::NotApplicable;
        };
        let Some(current) = state.view.row(form_id) else {
            return PatchDecision::NotApplicable;
        };

        match current.patched(department, *new_status) {
            None => PatchDecision::NotApplicable,
            Some(row) if row == *current => PatchDecision::Unchanged,
            Some(row) if row.matches(&self.scope, &state.filter) => PatchDecision::Apply(row),
            Some(_) => PatchDecision::LeavesFilter,
        }
    }

    fn on_debounce_expired(self: &Arc<Self>) {
        let mut state = self.lock_state();
        match state.debounce_deadline {
            Some(deadline) if deadline <= Instant::now() => {
                state.debounce_deadline = None;
                if state.in_flight.is_some() {
                    state.follow_up = true;
                } else {
                    self.start_fetch(&mut state);
                }
            }
            // 窗口已被新事件推迟或已被刷新消费
            _ => {}
        }
    }

    /// 有在途刷新则共享,否则开始新刷新
    fn request_fetch(self: &Arc<Self>, state: &mut State) -> watch::Receiver<Option<RefreshOutcome>> {
        match &state.in_flight {
            Some(rx) => rx.clone(),
            None => self.start_fetch(state),
        }
    }

    fn start_fetch(self: &Arc<Self>, state: &mut State) -> watch::Receiver<Option<RefreshOutcome>> {
        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());
        state.debounce_deadline = None;
        state.follow_up = false;
        state.stats.fetches_started += 1;

        let filter = state.filter.clone();
        let inner = Arc::clone(self);
        tracing::debug!(scope = %self.scope, "开始刷新");

        tokio::spawn(async move {
            let fetch = {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { inner.fetcher.fetch(&inner.scope, &filter).await })
            };

            // 超时后放弃等待；获取任务不被取消,其结果不再被读取
            let result = match tokio::time::timeout(inner.config.refresh_timeout(), fetch).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(RefreshError::Aborted(join_error.to_string())),
                Err(_) => Err(RefreshError::Timeout {
                    scope: inner.scope.label(),
                    after_ms: inner.config.refresh_timeout_ms,
                }),
            };

            inner.complete_fetch(result, tx);
        });

        rx
    }

    fn complete_fetch(
        self: &Arc<Self>,
        result: Result<Vec<ViewRow>, RefreshError>,
        tx: watch::Sender<Option<RefreshOutcome>>,
    ) {
        let (outcome, update) = {
            let mut state = self.lock_state();
            state.in_flight = None;
            state.stats.fetches_completed += 1;

            match result {
                Ok(rows) => {
                    let view = Arc::new(ViewState {
                        rows,
                        fetched_at: Some(Utc::now()),
                        stale: false,
                    });
                    state.view = Arc::clone(&view);

                    if state.follow_up {
                        state.stats.follow_ups += 1;
                        self.start_fetch(&mut state);
                    }

                    (Ok(Arc::clone(&view)), ViewUpdate::Refreshed(view))
                }
                Err(err) => {
                    match err {
                        RefreshError::Timeout { .. } => {
                            state.stats.timeouts += 1;
                            tracing::warn!(scope = %self.scope, error = %err, "看板刷新超时，保留上次数据");
                        }
                        _ => {
                            state.stats.failures += 1;
                            tracing::warn!(scope = %self.scope, error = %err, "看板刷新失败，保留上次数据");
                        }
                    }

                    // 不自动重试
                    state.follow_up = false;

                    let view = Arc::new(state.view.marked_stale());
                    state.view = Arc::clone(&view);
                    (Err(err.clone()), ViewUpdate::Stale { reason: err, view })
                }
            }
        };

        let _ = tx.send(Some(outcome));
        let _ = self.updates.send(update);
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    mut subscription: RealtimeSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut subscription_open = true;
    let mut poll = inner.config.poll_interval().map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        let deadline = inner.lock_state().debounce_deadline;

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            delivery = subscription.recv(), if subscription_open => match delivery {
                Delivery::Event(envelope) => {
                    inner.ingest(&envelope.event);
                }
                Delivery::Lagged(skipped) => {
                    tracing::warn!(scope = %inner.scope, skipped, "看板落后于广播通道，安排全量刷新");
                    inner.trigger(TriggerSource::Push);
                }
                Delivery::Closed => {
                    tracing::warn!(scope = %inner.scope, "广播通道已关闭");
                    subscription_open = false;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                inner.on_debounce_expired();
            }
            _ = inner.wakeup.notified() => {}
            _ = next_poll(&mut poll) => {
                inner.trigger(TriggerSource::Poll);
            }
        }
    }
}
