//! In-memory [`TaskStore`].
//!
//! Everything lives behind one `RwLock`; each trait call is atomic with
//! respect to the others. Nothing survives the process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::TaskStore;
use crate::tasks::{
    GlobalSettings, GrabTask, InstanceResult, LogLevel, NewTask, ProfileId, ProviderProfile,
    TaskId, TaskLogEntry, TaskStatus,
};

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<TaskId, GrabTask>,
    logs: Vec<TaskLogEntry>,
    profiles: HashMap<ProfileId, ProviderProfile>,
    settings: GlobalSettings,
    next_task: u64,
    next_log: u64,
}

impl Inner {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut GrabTask, StoreError> {
        self.tasks.get_mut(&id).ok_or(StoreError::MissingTask(id))
    }
}

/// Process-local store used by tests, demos and single-node deployments
/// that accept losing state on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a provider profile.
    pub async fn put_profile(&self, profile: ProviderProfile) {
        self.inner.write().await.profiles.insert(profile.id, profile);
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: NewTask) -> Result<GrabTask, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_task = inner.next_task.saturating_add(1);
        let id = TaskId(inner.next_task);
        let record = task.into_task(id, Utc::now());
        inner.tasks.insert(id, record.clone());
        Ok(record)
    }

    async fn load(&self, id: TaskId) -> Result<Option<GrabTask>, StoreError> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<GrabTask>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.values().rev().cloned().collect())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<GrabTask>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_count(&self, id: TaskId) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        if task.current_count >= task.target_count {
            return Err(StoreError::CountSaturated {
                id,
                target: task.target_count,
            });
        }
        task.current_count = task.current_count.saturating_add(1);
        task.updated_at = Utc::now();
        Ok(task.current_count)
    }

    async fn append_instance_result(
        &self,
        id: TaskId,
        result: InstanceResult,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        task.instances.push(result);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let existed = inner.tasks.remove(&id).is_some();
        inner.logs.retain(|entry| entry.task_id != id);
        Ok(existed)
    }

    async fn append_log(
        &self,
        id: TaskId,
        level: LogLevel,
        message: String,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&id) {
            return Err(StoreError::MissingTask(id));
        }
        inner.next_log = inner.next_log.saturating_add(1);
        let entry = TaskLogEntry {
            id: inner.next_log,
            task_id: id,
            level,
            message,
            created_at: Utc::now(),
        };
        inner.logs.push(entry);
        Ok(())
    }

    async fn logs(&self, id: TaskId) -> Result<Vec<TaskLogEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .logs
            .iter()
            .rev()
            .filter(|entry| entry.task_id == id)
            .cloned()
            .collect())
    }

    async fn load_profile(&self, id: ProfileId) -> Result<Option<ProviderProfile>, StoreError> {
        Ok(self.inner.read().await.profiles.get(&id).cloned())
    }

    async fn settings(&self) -> Result<GlobalSettings, StoreError> {
        Ok(self.inner.read().await.settings)
    }

    async fn save_settings(&self, settings: GlobalSettings) -> Result<(), StoreError> {
        self.inner.write().await.settings = settings;
        Ok(())
    }
}
