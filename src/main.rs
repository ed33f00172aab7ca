// ==========================================
// 离校手续审批系统 - 主入口
// ==========================================
// 用法: no-dues-sync [db_path]
// 启动实时桥接与管理员看板，输出视图更新直到 Ctrl-C
// ==========================================

use anyhow::Context;
use no_dues_sync::app::{get_default_db_path, AppState};
use no_dues_sync::logging;
use no_dues_sync::realtime::{DashboardScope, ViewFilter, ViewUpdate};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", no_dues_sync::APP_NAME);
    tracing::info!("系统版本: {}", no_dues_sync::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;
    state.start_realtime();

    let dashboard = state.open_dashboard(DashboardScope::Admin, ViewFilter::all());
    let mut updates = dashboard.subscribe();

    if let Err(e) = dashboard.refresh().await {
        tracing::warn!("首次刷新失败: {}", e);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到退出信号");
                break;
            }
            update = updates.recv() => match update {
                Ok(ViewUpdate::Refreshed(view)) => {
                    tracing::info!(rows = view.rows.len(), "看板已刷新");
                }
                Ok(ViewUpdate::Patched { form_id, department, view }) => {
                    tracing::info!(form_id = %form_id, department = %department, rows = view.rows.len(), "看板行已更新");
                }
                Ok(ViewUpdate::Stale { reason, .. }) => {
                    tracing::warn!(reason = %reason, "看板数据已过期");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "视图更新积压");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    dashboard.stop().await;
    state.shutdown().await;

    let stats = dashboard.stats();
    tracing::info!(
        fetches = stats.fetches_started,
        patches = stats.patches_applied,
        timeouts = stats.timeouts,
        "已退出"
    );
    Ok(())
}
