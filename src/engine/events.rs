// ==========================================
// 离校手续审批系统 - 原始变更通知
// ==========================================
// 职责: 定义存储层发出的原始变更通知 (ChangeEvent) 及其订阅通道
// 说明: 存储层在事务提交后按写入顺序发布,回滚的工作单元不发布任何通知
// ==========================================

use crate::domain::form::{DepartmentStatus, Form, ReapplicationHistoryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

// ==========================================
// 变更类型 / 变更表
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeTable {
    Forms,
    DepartmentStatuses,
    ReapplicationHistory,
}

impl ChangeTable {
    /// 对应的数据库表名
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeTable::Forms => "no_dues_forms",
            ChangeTable::DepartmentStatuses => "no_dues_status",
            ChangeTable::ReapplicationHistory => "no_dues_reapplication_history",
        }
    }
}

impl fmt::Display for ChangeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 行镜像
// ==========================================

/// 变更前/后的行镜像（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "row", content = "data")]
pub enum RowImage {
    Form(Form),
    DepartmentStatus(DepartmentStatus),
    ReapplicationHistory(ReapplicationHistoryEntry),
}

impl RowImage {
    pub fn name(&self) -> &'static str {
        match self {
            RowImage::Form(_) => "Form",
            RowImage::DepartmentStatus(_) => "DepartmentStatus",
            RowImage::ReapplicationHistory(_) => "ReapplicationHistory",
        }
    }
}

// ==========================================
// ChangeEvent - 原始变更通知
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: ChangeTable,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// 插入通知（无变更前镜像）
    pub fn insert(table: ChangeTable, after: RowImage) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table,
            before: None,
            after: Some(after),
            recorded_at: Utc::now(),
        }
    }

    /// 更新通知
    pub fn update(table: ChangeTable, before: RowImage, after: RowImage) -> Self {
        Self {
            kind: ChangeKind::Update,
            table,
            before: Some(before),
            after: Some(after),
            recorded_at: Utc::now(),
        }
    }
}

// ==========================================
// ChangeNotifier - 变更通知分发
// ==========================================
// 每个订阅者一个无界队列: 原始通知不允许丢失,否则分类器无法识别再申请

struct FeedSubscriber {
    tables: Vec<ChangeTable>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// 存储层变更通知分发器
#[derive(Default)]
pub struct ChangeNotifier {
    subscribers: Mutex<Vec<FeedSubscriber>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅指定表的变更
    pub fn subscribe(&self, tables: &[ChangeTable]) -> ChangeFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(FeedSubscriber {
            tables: tables.to_vec(),
            tx,
        });
        ChangeFeed { rx }
    }

    /// 按顺序分发一批已提交的变更,并清理已关闭的订阅者
    pub fn notify(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }

        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        subscribers.retain(|subscriber| {
            for event in events {
                if !subscriber.tables.contains(&event.table) {
                    continue;
                }
                if subscriber.tx.send(event.clone()).is_err() {
                    tracing::debug!("ChangeNotifier: 订阅者已关闭，移除");
                    return false;
                }
            }
            true
        });
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// 变更通知订阅端
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeFeed {
    /// 等待下一条变更；分发器释放后返回 None
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// 非阻塞读取（用于同步代码与测试）
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::form::DepartmentStatus;

    fn status_image() -> RowImage {
        RowImage::DepartmentStatus(DepartmentStatus::pending("F1", "library", Utc::now()))
    }

    #[test]
    fn test_feed_filters_by_table() {
        let notifier = ChangeNotifier::new();
        let mut status_feed = notifier.subscribe(&[ChangeTable::DepartmentStatuses]);
        let mut form_feed = notifier.subscribe(&[ChangeTable::Forms]);

        notifier.notify(&[ChangeEvent::insert(ChangeTable::DepartmentStatuses, status_image())]);

        assert!(status_feed.try_recv().is_some());
        assert!(form_feed.try_recv().is_none());
    }

    #[test]
    fn test_closed_feed_is_removed() {
        let notifier = ChangeNotifier::new();
        let feed = notifier.subscribe(&[ChangeTable::DepartmentStatuses]);
        assert_eq!(notifier.subscriber_count(), 1);

        drop(feed);
        notifier.notify(&[ChangeEvent::insert(ChangeTable::DepartmentStatuses, status_image())]);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn test_notify_preserves_write_order() {
        let notifier = ChangeNotifier::new();
        let mut feed = notifier.subscribe(&[ChangeTable::DepartmentStatuses, ChangeTable::Forms]);

        let first = ChangeEvent::insert(ChangeTable::DepartmentStatuses, status_image());
        let second = ChangeEvent::update(ChangeTable::DepartmentStatuses, status_image(), status_image());
        notifier.notify(&[first.clone(), second.clone()]);

        assert_eq!(feed.try_recv().unwrap().kind, ChangeKind::Insert);
        assert_eq!(feed.try_recv().unwrap().kind, ChangeKind::Update);
        assert!(feed.try_recv().is_none());
    }
}
