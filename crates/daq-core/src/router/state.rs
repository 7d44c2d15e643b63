use std::{collections::HashMap, sync::Arc};

use daq_model::{LaunchInfo, StatusUpdate, TaskId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::Task;

/// The live-task table.
///
/// Only the router writes to it: insert after a successful launch, remove after a terminal
/// status or a completed kill.
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    inner: Arc<RwLock<HashMap<TaskId, Arc<Task>>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &TaskId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Insert `task`; returns `false` (and keeps the existing entry) if the id is taken.
    pub(crate) async fn insert(&self, task: Arc<Task>) -> bool {
        let mut tasks = self.inner.write().await;
        if tasks.contains_key(task.id()) {
            return false;
        }
        tasks.insert(task.id().clone(), task);
        true
    }

    pub(crate) async fn remove(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.inner.write().await.remove(id)
    }

    /// Remove the entry only if it is still this very task.
    pub(crate) async fn remove_same(&self, task: &Arc<Task>) -> bool {
        let mut tasks = self.inner.write().await;
        let same = tasks
            .get(task.id())
            .is_some_and(|current| Arc::ptr_eq(current, task));
        if same {
            tasks.remove(task.id());
        }
        same
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<TaskId> {
        self.inner.read().await.keys().cloned().collect()
    }
}

/// Delivery bookkeeping towards the cluster manager.
#[derive(Debug, Default)]
pub(crate) struct AckLedger {
    /// Launches not acknowledged yet.
    pub(crate) unacked_tasks: HashMap<TaskId, LaunchInfo>,
    /// Updates sent but not acknowledged, by token.
    pub(crate) unacked_updates: HashMap<Uuid, StatusUpdate>,
    /// Latest undeliverable or FAILED update per task, retried on housekeeping.
    pub(crate) failed: HashMap<TaskId, StatusUpdate>,
}

impl AckLedger {
    pub(crate) fn acknowledge(&mut self, task_id: &TaskId, uuid: &Uuid) {
        self.unacked_tasks.remove(task_id);
        self.unacked_updates.remove(uuid);
        if self.failed.get(task_id).is_some_and(|u| u.uuid == *uuid) {
            self.failed.remove(task_id);
        }
    }

    /// Unacknowledged updates, oldest first.
    pub(crate) fn pending_updates(&self) -> Vec<StatusUpdate> {
        let mut updates: Vec<_> = self.unacked_updates.values().cloned().collect();
        updates.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testutil::{basic, task};
    use daq_model::TaskStatus;

    #[tokio::test]
    async fn table_rejects_duplicate_ids() {
        let table = TaskTable::new();
        let (t1, _rx1) = task(basic("true"));
        let (t2, _rx2) = task(basic("true"));

        assert!(table.insert(Arc::new(t1)).await);
        assert!(!table.insert(Arc::new(t2)).await);
        assert_eq!(table.len().await, 1);
        assert!(table.contains(&TaskId::from("t-1")).await);

        let (other, _rx3) = task(basic("true"));
        assert!(!table.remove_same(&Arc::new(other)).await);
        assert!(table.remove(&TaskId::from("t-1")).await.is_some());
        assert!(table.is_empty().await);
    }

    #[test]
    fn ack_clears_every_set() {
        let mut ledger = AckLedger::default();
        let id = TaskId::from("t-1");
        let update = StatusUpdate::new(id.clone(), TaskStatus::Failed, None, "exec");
        ledger.unacked_tasks.insert(
            id.clone(),
            LaunchInfo {
                task_id: id.clone(),
                name: "t".into(),
                data: None,
            },
        );
        ledger.unacked_updates.insert(update.uuid, update.clone());
        ledger.failed.insert(id.clone(), update.clone());

        ledger.acknowledge(&id, &update.uuid);
        assert!(ledger.unacked_tasks.is_empty());
        assert!(ledger.unacked_updates.is_empty());
        assert!(ledger.failed.is_empty());
    }

    #[test]
    fn ack_keeps_newer_failed_update() {
        let mut ledger = AckLedger::default();
        let id = TaskId::from("t-1");
        let old = StatusUpdate::new(id.clone(), TaskStatus::Running, None, "exec");
        let newer = StatusUpdate::new(id.clone(), TaskStatus::Failed, None, "exec");
        ledger.failed.insert(id.clone(), newer.clone());

        ledger.acknowledge(&id, &old.uuid);
        assert_eq!(ledger.failed.get(&id), Some(&newer));
    }
}
