// ==========================================
// 离校手续审批系统 - 实时桥接任务
// ==========================================
// 职责: 存储变更流 → 分类器 → 广播通道
// 生命周期: 由宿主进程显式 start()/stop()
// ==========================================

use crate::engine::events::{ChangeFeed, ChangeTable};
use crate::realtime::channel::RealtimeChannel;
use crate::realtime::classifier::ChangeClassifier;
use crate::realtime::error::ClassifyError;
use crate::repository::workflow_store::WorkflowStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WATCHED_TABLES: [ChangeTable; 3] = [
    ChangeTable::Forms,
    ChangeTable::DepartmentStatuses,
    ChangeTable::ReapplicationHistory,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub running: bool,
    pub classified: u64, // 已发布的语义事件
    pub rejected: u64,   // 无法识别的变更
    pub ignored: u64,    // 无语义变更
}

#[derive(Default)]
struct BridgeCounters {
    running: AtomicBool,
    classified: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
}

struct RunningBridge {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct RealtimeBridge {
    store: Arc<dyn WorkflowStore>,
    channel: RealtimeChannel,
    counters: Arc<BridgeCounters>,
    running: Mutex<Option<RunningBridge>>,
}

impl RealtimeBridge {
    pub fn new(store: Arc<dyn WorkflowStore>, channel: RealtimeChannel) -> Self {
        Self {
            store,
            channel,
            counters: Arc::new(BridgeCounters::default()),
            running: Mutex::new(None),
        }
    }

    /// 启动桥接任务（已运行时为空操作）
    ///
    /// 订阅在返回前完成：start() 之后提交的变更都会被处理
    pub fn start(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            tracing::debug!("RealtimeBridge 已在运行");
            return;
        }

        let feed = self.store.subscribe_changes(&WATCHED_TABLES);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = self.channel.clone();
        let counters = Arc::clone(&self.counters);

        counters.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_bridge(feed, channel, counters, shutdown_rx));
        *running = Some(RunningBridge { shutdown_tx, handle });

        tracing::info!("RealtimeBridge 已启动");
    }

    /// 停止桥接任务并等待其退出
    pub async fn stop(&self) {
        let running = {
            let mut guard = match self.running.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };

        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "RealtimeBridge 任务异常退出");
        }
        self.counters.running.store(false, Ordering::SeqCst);
        tracing::info!("RealtimeBridge 已停止");
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            running: self.counters.running.load(Ordering::SeqCst),
            classified: self.counters.classified.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            ignored: self.counters.ignored.load(Ordering::SeqCst),
        }
    }
}

async fn run_bridge(
    mut feed: ChangeFeed,
    channel: RealtimeChannel,
    counters: Arc<BridgeCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut classifier = ChangeClassifier::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            change = feed.recv() => {
                let Some(change) = change else {
                    tracing::warn!("变更流已关闭，RealtimeBridge 退出");
                    break;
                };

                match classifier.classify(&change) {
                    Ok(event) => {
                        counters.classified.fetch_add(1, Ordering::SeqCst);
                        channel.publish(event);
                    }
                    Err(ClassifyError::NoSemanticChange { kind, table }) => {
                        counters.ignored.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!(%kind, %table, "无语义变更");
                    }
                    Err(e @ ClassifyError::Unrecognized { .. }) => {
                        counters.rejected.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(error = %e, "拒绝无法识别的变更");
                    }
                }
            }
        }
    }

    counters.running.store(false, Ordering::SeqCst);
}
