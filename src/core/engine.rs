//! # Engine: composition root of the grab engine.
//!
//! The [`Engine`] owns the event bus, the [`SubscriberSet`], the
//! [`TaskRegistry`] and the [`ReactiveTrigger`], and exposes the operations a
//! management layer (HTTP API, CLI) calls.
//!
//! ```text
//! Engine::builder(cfg).connector(..).store(..).build()
//!   └─► init()                    StartupRecovery + trigger if auto grab is on
//!   └─► start_task / stop_task    ─► TaskRegistry
//!   └─► create_task / delete_task ─► TaskStore (+ provider subnet lookup)
//!   └─► terminate_instance        ─► ProviderClient + task log
//!   └─► set_auto_grab             ─► GlobalSettings + ReactiveTrigger
//!   └─► run_until_signal()        ─► shutdown(): trigger off, cancel executors, wait ≤ grace
//!
//! Event flow:
//!   Registry / Executors / Trigger ── publish ──► Bus ──► listener ──► SubscriberSet
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use capgrab::{
//!     Engine, EngineConfig, MemoryStore, NewTask, ProfileId, ProviderProfile,
//!     SimulatedProvider, StaticConnector, TaskStatus,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.put_profile(ProviderProfile::new(ProfileId(1), "main", "ap-tokyo-1")).await;
//!
//!     let provider = Arc::new(SimulatedProvider::new());
//!     let engine = Engine::builder(EngineConfig::default())
//!         .store(store)
//!         .connector(Arc::new(StaticConnector::new(provider)))
//!         .build()?;
//!     engine.init().await?;
//!
//!     let task = engine
//!         .create_task(NewTask::new(ProfileId(1), "VM.Standard.A1.Flex", "AD-1", "ocid1.image.x"))
//!         .await?;
//!     assert_eq!(task.status, TaskStatus::Stopped);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::core::{
    EngineConfig, RecoveryReport, StartOutcome, StartupRecovery, StopOutcome, TaskRegistry,
    builder::EngineBuilder, shutdown,
};
use crate::error::{GrabError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::provider::{InstanceRef, ProviderConnector};
use crate::store::TaskStore;
use crate::subscribers::SubscriberSet;
use crate::tasks::{
    GlobalSettings, GrabTask, InstanceResult, LogLevel, NewTask, TaskId, TaskLogEntry,
    TaskStatus,
};
use crate::trigger::ReactiveTrigger;

/// Grab engine: task registry, reactive trigger and event fan-out.
pub struct Engine {
    cfg: EngineConfig,
    store: Arc<dyn TaskStore>,
    connector: Arc<dyn ProviderConnector>,
    registry: Arc<TaskRegistry>,
    trigger: Arc<ReactiveTrigger>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
}

impl Engine {
    /// Starts building an engine.
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: EngineConfig,
        store: Arc<dyn TaskStore>,
        connector: Arc<dyn ProviderConnector>,
        registry: Arc<TaskRegistry>,
        trigger: Arc<ReactiveTrigger>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
    ) -> Self {
        Self {
            cfg,
            store,
            connector,
            registry,
            trigger,
            bus,
            subs,
        }
    }

    /// Forwards bus events to the subscriber set until the bus closes.
    pub(crate) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(Arc::new(ev)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Recovers persisted `running` tasks and subscribes the reactive
    /// trigger when auto grab is enabled.
    ///
    /// # Errors
    /// Store failures while listing tasks or reading settings, and
    /// [`GrabError::Source`] if the trigger cannot subscribe.
    pub async fn init(&self) -> Result<RecoveryReport, GrabError> {
        let report = StartupRecovery::new(Arc::clone(&self.store), Arc::clone(&self.registry))
            .run()
            .await?;
        if self.store.settings().await?.auto_grab_enabled {
            self.trigger.enable().await?;
        }
        Ok(report)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Event bus; subscribe to observe runtime events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn trigger(&self) -> &Arc<ReactiveTrigger> {
        &self.trigger
    }

    /// See [`TaskRegistry::start`].
    pub async fn start_task(&self, id: TaskId) -> Result<StartOutcome, GrabError> {
        self.registry.start(id).await
    }

    /// See [`TaskRegistry::stop`].
    pub async fn stop_task(&self, id: TaskId) -> Result<StopOutcome, GrabError> {
        self.registry.stop(id).await
    }

    /// Validates and stores a new task in `stopped` status.
    ///
    /// When the definition names no subnet, the profile's default subnet is
    /// used, or one is resolved (and created if needed) through the provider.
    ///
    /// # Errors
    /// [`GrabError::InvalidTask`], [`GrabError::ProfileNotFound`], provider
    /// failures while resolving the subnet, store failures.
    pub async fn create_task(&self, mut task: NewTask) -> Result<GrabTask, GrabError> {
        task.validate()?;
        let profile = self
            .store
            .load_profile(task.profile_id)
            .await?
            .ok_or(GrabError::ProfileNotFound(task.profile_id))?;

        if task.subnet_id.is_none() {
            let subnet = match profile.subnet_id.clone() {
                Some(subnet) => subnet,
                None => self.connector.connect(&profile)?.resolve_subnet().await?,
            };
            task.subnet_id = Some(subnet);
        }

        let created = self.store.insert(task).await?;
        info!(task_id = %created.id, profile_id = %created.profile_id, shape = %created.shape, "task created");
        Ok(created)
    }

    /// Deletes a task and its logs.
    ///
    /// # Errors
    /// [`GrabError::NotFound`], or [`GrabError::TaskIsRunning`] while the task
    /// is `running` or has a live executor.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), GrabError> {
        let task = self.task(id).await?;
        if task.status == TaskStatus::Running || self.registry.is_active(id).await {
            return Err(GrabError::TaskIsRunning(id));
        }
        if !self.store.delete(id).await? {
            return Err(GrabError::NotFound(id));
        }
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// # Errors
    /// [`GrabError::NotFound`] for an unknown id.
    pub async fn task(&self, id: TaskId) -> Result<GrabTask, GrabError> {
        self.store.load(id).await?.ok_or(GrabError::NotFound(id))
    }

    /// All tasks, newest first.
    pub async fn tasks(&self) -> Result<Vec<GrabTask>, GrabError> {
        Ok(self.store.list().await?)
    }

    /// Log entries of a task, newest first.
    pub async fn logs(&self, id: TaskId) -> Result<Vec<TaskLogEntry>, GrabError> {
        self.task(id).await?;
        Ok(self.store.logs(id).await?)
    }

    /// Instances provisioned by a task, in provisioning order.
    pub async fn instances(&self, id: TaskId) -> Result<Vec<InstanceResult>, GrabError> {
        Ok(self.task(id).await?.instances)
    }

    /// Terminates an instance provisioned by task `id`.
    ///
    /// The outcome is appended to the task log; the instance stays in the
    /// task's results, which record what was provisioned.
    ///
    /// # Errors
    /// [`GrabError::NotFound`], [`GrabError::InstanceNotFound`] if the task
    /// never provisioned `instance_id`, [`GrabError::ProfileNotFound`], the
    /// provider error of the termination call, store failures.
    pub async fn terminate_instance(&self, id: TaskId, instance_id: &str) -> Result<(), GrabError> {
        let task = self.task(id).await?;
        if !task.instances.iter().any(|i| i.instance_id == instance_id) {
            return Err(GrabError::InstanceNotFound {
                task: id,
                instance: instance_id.to_string(),
            });
        }
        let profile = self
            .store
            .load_profile(task.profile_id)
            .await?
            .ok_or(GrabError::ProfileNotFound(task.profile_id))?;
        let client = self.connector.connect(&profile)?;

        if let Err(err) = client.terminate_instance(&InstanceRef::new(instance_id)).await {
            warn!(task_id = %id, instance_id, error = %err, "instance termination failed");
            self.store
                .append_log(
                    id,
                    LogLevel::Error,
                    format!("terminating instance {instance_id} failed: {err}"),
                )
                .await?;
            return Err(err.into());
        }
        self.store
            .append_log(id, LogLevel::Info, format!("instance {instance_id} terminated"))
            .await?;
        info!(task_id = %id, instance_id, "instance terminated");
        Ok(())
    }

    pub async fn settings(&self) -> Result<GlobalSettings, GrabError> {
        Ok(self.store.settings().await?)
    }

    /// Persists the auto grab setting and (un)subscribes the trigger.
    ///
    /// Enabling persists the setting only once the subscription succeeded.
    ///
    /// # Errors
    /// [`GrabError::Source`] if subscribing fails; store failures.
    pub async fn set_auto_grab(&self, enabled: bool) -> Result<GlobalSettings, GrabError> {
        let mut settings = self.store.settings().await?;
        settings.auto_grab_enabled = enabled;
        if enabled {
            self.trigger.enable().await?;
            self.store.save_settings(settings).await?;
        } else {
            self.store.save_settings(settings).await?;
            self.trigger.disable().await;
        }
        info!(enabled, "auto grab updated");
        Ok(settings)
    }

    /// Waits for a termination signal, then shuts down.
    ///
    /// # Errors
    /// [`RuntimeError::Signal`] if signal handlers cannot be installed, or the
    /// error of [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await
    }

    /// Unsubscribes the trigger and stops every executor within the grace period.
    ///
    /// Persisted statuses are not changed, so running tasks resume on the next
    /// [`init`](Self::init).
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] listing the executors still alive.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.trigger.disable().await;

        let grace = self.cfg.grace();
        match tokio::time::timeout(grace, self.registry.shutdown()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck = self.registry.active().await;
                let listed: Vec<String> = stuck.iter().map(ToString::to_string).collect();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(listed.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}
