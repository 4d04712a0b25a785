use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use scheduler_errors::TaskId;

/// 队列排序键：触发时间 -> 优先级（越小越优先）-> 入队序号（相同时先进先出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub fire_time: DateTime<Utc>,
    pub priority: i32,
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<QueueKey, TaskId>,
    index: HashMap<TaskId, QueueKey>,
    next_sequence: u64,
}

impl QueueState {
    fn remove(&mut self, task_id: TaskId) -> Option<QueueKey> {
        let key = self.index.remove(&task_id)?;
        self.entries.remove(&key);
        Some(key)
    }

    fn insert_with_key(&mut self, task_id: TaskId, key: QueueKey) {
        self.remove(task_id);
        self.entries.insert(key, task_id);
        self.index.insert(task_id, key);
    }
}

/// 按到期时间排序的待执行任务队列
///
/// 只保存未在执行中的任务。插入、删除、弹出均为 O(log n)。
/// 每次插入都会唤醒等待中的调度循环。
#[derive(Debug, Default)]
pub struct DueTimeQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DueTimeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入任务，已在队列中的任务会以新的序号重新排序
    pub async fn insert(&self, task_id: TaskId, fire_time: DateTime<Utc>, priority: i32) -> QueueKey {
        let key = {
            let mut state = self.state.lock().await;
            let key = QueueKey {
                fire_time,
                priority,
                sequence: state.next_sequence,
            };
            state.next_sequence += 1;
            state.insert_with_key(task_id, key);
            key
        };
        trace!(task_id, fire_time = %fire_time, priority, "任务已入队");
        self.notify.notify_one();
        key
    }

    /// 返回最早的任务，仅当其触发时间不晚于 `now`
    pub async fn peek_due(&self, now: DateTime<Utc>) -> Option<(TaskId, QueueKey)> {
        let state = self.state.lock().await;
        state
            .entries
            .first_key_value()
            .filter(|(key, _)| key.fire_time <= now)
            .map(|(key, task_id)| (*task_id, *key))
    }

    /// 弹出最早的到期任务
    pub async fn pop_due(&self, now: DateTime<Utc>) -> Option<(TaskId, QueueKey)> {
        let mut state = self.state.lock().await;
        let (key, task_id) = match state.entries.first_key_value() {
            Some((key, task_id)) if key.fire_time <= now => (*key, *task_id),
            _ => return None,
        };
        state.entries.remove(&key);
        state.index.remove(&task_id);
        Some((task_id, key))
    }

    pub async fn remove(&self, task_id: TaskId) -> bool {
        self.state.lock().await.remove(task_id).is_some()
    }

    pub async fn contains(&self, task_id: TaskId) -> bool {
        self.state.lock().await.index.contains_key(&task_id)
    }

    /// 队首任务的触发时间
    pub async fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .entries
            .first_key_value()
            .map(|(key, _)| key.fire_time)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 等待下一次插入
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
