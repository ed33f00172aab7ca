// ==========================================
// 离校手续审批系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和 API 实例
// 生命周期: new() → start_realtime() → open_dashboard()* → shutdown()
// ==========================================

use std::sync::Arc;

use crate::api::WorkflowApi;
use crate::config::config_manager::ConfigManager;
use crate::config::RealtimeConfig;
use crate::realtime::{
    BridgeStatus, ChannelHealth, DashboardScope, RealtimeBridge, RealtimeChannel, RefreshCoordinator,
    StoreViewFetcher, ViewFilter,
};
use crate::repository::{SqliteWorkflowStore, WorkflowStore};

/// 默认数据库路径的环境变量
pub const DB_PATH_ENV: &str = "NO_DUES_DB";

/// 应用状态
///
/// 包含存储、配置、实时同步组件和 API 实例
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 打开时读取到的表结构版本
    pub schema_version: Option<i64>,

    /// 审批流存储（全部组件共享同一连接）
    pub store: Arc<dyn WorkflowStore>,

    pub config_manager: Arc<ConfigManager>,

    /// 启动时加载的实时同步配置
    pub realtime_config: RealtimeConfig,

    /// 分类事件广播通道
    pub channel: RealtimeChannel,

    /// 存储变更 → 广播通道的桥接任务
    pub bridge: Arc<RealtimeBridge>,

    /// 审批流程API
    pub workflow_api: Arc<WorkflowApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    ///
    /// # 说明
    /// 打开数据库时会确保审批流表结构存在；配置读取失败时回退默认值
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let sqlite_store =
            SqliteWorkflowStore::open(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;

        let schema_version = {
            let conn = sqlite_store.connection();
            let guard = conn.lock().map_err(|e| format!("数据库锁获取失败: {}", e))?;
            let version =
                crate::db::read_schema_version(&guard).map_err(|e| format!("无法读取表结构版本: {}", e))?;
            version
        };
        tracing::info!(schema_version = ?schema_version, "数据库表结构版本");

        let config_manager = ConfigManager::from_connection(sqlite_store.connection())
            .map_err(|e| format!("无法初始化配置管理器: {}", e))?;

        let realtime_config = config_manager.realtime_config().unwrap_or_else(|e| {
            tracing::warn!("实时同步配置读取失败，使用默认值: {}", e);
            RealtimeConfig::default()
        });
        let rules = config_manager.workflow_rules().unwrap_or_else(|e| {
            tracing::warn!("审批规则配置读取失败，使用默认值: {}", e);
            Default::default()
        });

        let store: Arc<dyn WorkflowStore> = Arc::new(sqlite_store);
        let channel = RealtimeChannel::new(realtime_config.channel_capacity);
        let bridge = Arc::new(RealtimeBridge::new(Arc::clone(&store), channel.clone()));
        let workflow_api = Arc::new(WorkflowApi::new(Arc::clone(&store), rules));

        tracing::info!(
            debounce_ms = realtime_config.debounce_ms,
            refresh_timeout_ms = realtime_config.refresh_timeout_ms,
            channel_capacity = realtime_config.channel_capacity,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            schema_version,
            store,
            config_manager: Arc::new(config_manager),
            realtime_config,
            channel,
            bridge,
            workflow_api,
        })
    }

    /// 启动实时桥接（需在 Tokio 运行时内调用）
    pub fn start_realtime(&self) {
        self.bridge.start();
    }

    /// 打开一个看板: 创建并启动该范围的刷新协调器
    ///
    /// 协调器订阅在返回前完成，之后发布的事件都会被该看板收到
    pub fn open_dashboard(&self, scope: DashboardScope, filter: ViewFilter) -> Arc<RefreshCoordinator> {
        let fetcher = Arc::new(StoreViewFetcher::new(Arc::clone(&self.store)));
        let coordinator = Arc::new(RefreshCoordinator::new(
            scope,
            filter,
            self.realtime_config.clone(),
            fetcher,
        ));
        coordinator.start(self.channel.subscribe());

        tracing::info!(scope = %coordinator.scope(), "看板已打开");
        coordinator
    }

    pub fn channel_health(&self) -> ChannelHealth {
        self.channel.health()
    }

    pub fn bridge_status(&self) -> BridgeStatus {
        self.bridge.status()
    }

    /// 停止实时桥接（已打开的看板由持有者自行 stop）
    pub async fn shutdown(&self) {
        self.bridge.stop().await;
        tracing::info!("AppState已关闭");
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 NO_DUES_DB，否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./no_dues.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("no-dues-sync");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("无法创建数据目录 {}: {}，使用当前目录", dir.display(), e);
        } else {
            path = dir.join("no_dues.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RefreshPhase;
    use tempfile::TempDir;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_app_state_lifecycle() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("app.db").to_string_lossy().to_string();

        let state = AppState::new(db_path).unwrap();
        assert_eq!(state.schema_version, Some(crate::db::CURRENT_SCHEMA_VERSION));
        state.start_realtime();
        assert!(state.bridge_status().running);

        let dashboard = state.open_dashboard(DashboardScope::Admin, ViewFilter::all());
        assert_eq!(dashboard.phase(), RefreshPhase::Idle);
        assert_eq!(state.channel_health().subscribers, 1);

        dashboard.stop().await;
        state.shutdown().await;
        assert!(!state.bridge_status().running);
    }
}
