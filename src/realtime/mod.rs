// ==========================================
// 离校手续审批系统 - 实时同步层
// ==========================================
// 职责: 原始变更分类、事件广播、看板刷新协调
// 数据流: ChangeFeed → RealtimeBridge(分类) → RealtimeChannel → RefreshCoordinator(每看板)
// ==========================================

pub mod bridge;
pub mod channel;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod view;

// 重导出核心类型
pub use bridge::{BridgeStatus, RealtimeBridge};
pub use channel::{ChannelHealth, Delivery, EventEnvelope, RealtimeChannel, RealtimeSubscription};
pub use classifier::{ChangeClassifier, ClassifiedEvent};
pub use coordinator::{
    CoordinatorStats, IngestOutcome, RefreshCoordinator, RefreshOutcome, RefreshPhase, TriggerSource,
};
pub use error::{ClassifyError, RefreshError};
pub use view::{
    DashboardScope, StoreViewFetcher, ViewFetcher, ViewFilter, ViewRow, ViewState, ViewUpdate,
};
