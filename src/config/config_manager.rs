// ==========================================
// 离校手续审批系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 约定: 非法配置值回退默认值并告警,不阻断启动
// ==========================================

use crate::config::settings::{RealtimeConfig, WorkflowRules};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key = %key, value = %value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置；缺失返回默认值，解析失败告警后返回默认值
    fn parse_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + std::fmt::Debug,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };

        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, default = ?default, "配置值非法，使用默认值");
                Ok(default)
            }
        }
    }

    // ===== 实时同步配置 =====

    pub fn realtime_config(&self) -> Result<RealtimeConfig, Box<dyn Error>> {
        let defaults = RealtimeConfig::default();

        let mut config = RealtimeConfig {
            debounce_ms: self.parse_or_default(config_keys::DEBOUNCE_MS, defaults.debounce_ms)?,
            refresh_timeout_ms: self
                .parse_or_default(config_keys::REFRESH_TIMEOUT_MS, defaults.refresh_timeout_ms)?,
            channel_capacity: self
                .parse_or_default(config_keys::CHANNEL_CAPACITY, defaults.channel_capacity)?,
            poll_interval_ms: self
                .parse_or_default(config_keys::POLL_INTERVAL_MS, defaults.poll_interval_ms)?,
            targeted_patch: self.parse_or_default(config_keys::TARGETED_PATCH, defaults.targeted_patch)?,
        };

        // 广播通道容量与超时必须为正
        if config.channel_capacity == 0 {
            tracing::warn!("channel_capacity 不能为 0，使用默认值");
            config.channel_capacity = defaults.channel_capacity;
        }
        if config.refresh_timeout_ms == 0 {
            tracing::warn!("refresh_timeout_ms 不能为 0，使用默认值");
            config.refresh_timeout_ms = defaults.refresh_timeout_ms;
        }

        Ok(config)
    }

    // ===== 审批规则配置 =====

    pub fn workflow_rules(&self) -> Result<WorkflowRules, Box<dyn Error>> {
        let defaults = WorkflowRules::default();

        Ok(WorkflowRules {
            max_reapplications_per_department: self.parse_or_default(
                config_keys::MAX_REAPPLICATIONS_PER_DEPARTMENT,
                defaults.max_reapplications_per_department,
            )?,
            min_reapply_message_len: self
                .parse_or_default(config_keys::MIN_REAPPLY_MESSAGE_LEN, defaults.min_reapply_message_len)?,
            max_bulk_actions: self.parse_or_default(config_keys::MAX_BULK_ACTIONS, defaults.max_bulk_actions)?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 实时同步
    pub const DEBOUNCE_MS: &str = "realtime/debounce_ms";
    pub const REFRESH_TIMEOUT_MS: &str = "realtime/refresh_timeout_ms";
    pub const CHANNEL_CAPACITY: &str = "realtime/channel_capacity";
    pub const POLL_INTERVAL_MS: &str = "realtime/poll_interval_ms";
    pub const TARGETED_PATCH: &str = "realtime/targeted_patch";

    // 审批规则
    pub const MAX_REAPPLICATIONS_PER_DEPARTMENT: &str = "workflow/max_reapplications_per_department";
    pub const MIN_REAPPLY_MESSAGE_LEN: &str = "workflow/min_reapply_message_len";
    pub const MAX_BULK_ACTIONS: &str = "workflow/max_bulk_actions";
}
