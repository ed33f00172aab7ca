// ==========================================
// 离校手续审批系统 - 实时广播通道
// ==========================================
// 职责: 进程内分类事件扇出（多读者、只追加）
// 约定: 至少一次投递,跨表单不保证顺序；订阅方必须幂等,事件只作为重新拉取的提示
// ==========================================

use crate::realtime::classifier::ClassifiedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// 广播条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub event: ClassifiedEvent,
}

/// 订阅端收到的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(EventEnvelope),
    /// 订阅方落后,丢失了 n 条事件（需要全量刷新）
    Lagged(u64),
    /// 通道已关闭
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelHealth {
    pub subscribers: usize,
    pub published: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

struct ChannelInner {
    tx: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
}

// ==========================================
// RealtimeChannel
// ==========================================
// 显式构造、可注入；克隆共享同一通道
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ChannelInner {
                tx,
                sequence: AtomicU64::new(0),
                last_event_at: Mutex::new(None),
            }),
        }
    }

    /// 发布事件；无订阅者时事件直接丢弃
    pub fn publish(&self, event: ClassifiedEvent) -> EventEnvelope {
        let now = Utc::now();
        let envelope = EventEnvelope {
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            published_at: now,
            event,
        };

        {
            let mut last = match self.inner.last_event_at.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = Some(now);
        }

        match self.inner.tx.send(envelope.clone()) {
            Ok(receivers) => {
                tracing::debug!(sequence = envelope.sequence, receivers, event = %envelope.event, "广播事件");
            }
            Err(_) => {
                tracing::trace!(sequence = envelope.sequence, "无订阅者，事件丢弃");
            }
        }

        envelope
    }

    pub fn subscribe(&self) -> RealtimeSubscription {
        RealtimeSubscription {
            rx: self.inner.tx.subscribe(),
        }
    }

    pub fn health(&self) -> ChannelHealth {
        let last_event_at = match self.inner.last_event_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        ChannelHealth {
            subscribers: self.inner.tx.receiver_count(),
            published: self.inner.sequence.load(Ordering::SeqCst),
            last_event_at,
        }
    }
}

// ==========================================
// RealtimeSubscription
// ==========================================
pub struct RealtimeSubscription {
    rx: broadcast::Receiver<EventEnvelope>,
}

impl RealtimeSubscription {
    pub async fn recv(&mut self) -> Delivery {
        match self.rx.recv().await {
            Ok(envelope) => Delivery::Event(envelope),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "订阅方落后，部分事件丢失");
                Delivery::Lagged(skipped)
            }
            Err(RecvError::Closed) => Delivery::Closed,
        }
    }

    /// 非阻塞读取；暂无事件返回 None
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(Delivery::Event(envelope)),
            Err(TryRecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(TryRecvError::Closed) => Some(Delivery::Closed),
            Err(TryRecvError::Empty) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(form_id: &str) -> ClassifiedEvent {
        ClassifiedEvent::NewSubmission {
            form_id: form_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let channel = RealtimeChannel::new(16);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        let sent = channel.publish(submission("F1"));
        assert_eq!(sent.sequence, 1);

        assert_eq!(a.recv().await, Delivery::Event(sent.clone()));
        assert_eq!(b.recv().await, Delivery::Event(sent));

        let health = channel.health();
        assert_eq!(health.subscribers, 2);
        assert_eq!(health.published, 1);
        assert!(health.last_event_at.is_some());
    }

    #[test]
    fn test_lagged_subscriber_is_told() {
        let channel = RealtimeChannel::new(2);
        let mut slow = channel.subscribe();

        for i in 0..5 {
            channel.publish(submission(&format!("F{}", i)));
        }

        assert_eq!(slow.try_recv(), Some(Delivery::Lagged(3)));
        assert!(matches!(slow.try_recv(), Some(Delivery::Event(_))));
    }

    #[test]
    fn test_closed_when_channel_dropped() {
        let channel = RealtimeChannel::new(4);
        let mut sub = channel.subscribe();
        drop(channel);
        assert_eq!(sub.try_recv(), Some(Delivery::Closed));
    }
}
