use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::core::{Engine, EngineConfig, StartOutcome, StartupRecovery, StopOutcome};
use crate::error::{GrabError, ProviderError, ProviderErrorKind, RuntimeError, StoreError};
use crate::events::EventKind;
use crate::provider::{
    InstanceRef, LaunchSpec, LifecycleState, ProviderClient, SimulatedProvider, StaticConnector,
};
use crate::store::{MemoryStore, TaskStore};
use crate::tasks::{
    GlobalSettings, GrabTask, InstanceResult, LogLevel, NewTask, ProfileId, ProviderProfile,
    TaskId, TaskLogEntry, TaskStatus,
};
use crate::trigger::BroadcastSource;

const ARM: &str = "VM.Standard.A1.Flex";
const AMD: &str = "VM.Standard.E2.1.Micro";
const TOKYO: ProfileId = ProfileId(1);
const ASHBURN: ProfileId = ProfileId(2);

struct Harness {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    provider: Arc<SimulatedProvider>,
    source: Arc<BroadcastSource>,
}

impl Harness {
    async fn new(provider: SimulatedProvider) -> Self {
        Self::with(EngineConfig::default(), provider, seeded_store().await).await
    }

    async fn with(cfg: EngineConfig, provider: SimulatedProvider, store: Arc<MemoryStore>) -> Self {
        let provider = Arc::new(provider);
        let source = Arc::new(BroadcastSource::default());
        let engine = Engine::builder(cfg)
            .store(Arc::clone(&store) as Arc<dyn TaskStore>)
            .connector(Arc::new(StaticConnector::new(Arc::clone(&provider) as Arc<dyn ProviderClient>)))
            .event_source(Arc::clone(&source) as Arc<dyn crate::trigger::EventSource>)
            .build()
            .unwrap();
        Self {
            engine,
            store,
            provider,
            source,
        }
    }

    async fn create(&self, profile: ProfileId, shape: &str) -> GrabTask {
        self.engine
            .create_task(NewTask::new(profile, shape, "AD-1", "ocid1.image.test"))
            .await
            .unwrap()
    }

    async fn status(&self, id: TaskId) -> TaskStatus {
        self.engine.task(id).await.unwrap().status
    }

    /// Chronological log entries.
    async fn history(&self, id: TaskId) -> Vec<TaskLogEntry> {
        let mut logs = self.engine.logs(id).await.unwrap();
        logs.reverse();
        logs
    }

    async fn wait_for_status(&self, id: TaskId, status: TaskStatus) {
        for _ in 0..10_000 {
            if self.status(id).await == status && !self.engine.registry().is_active(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("task {id} never reached {status}");
    }

    async fn wait_for_launches(&self, n: u32) {
        for _ in 0..10_000 {
            if self.provider.launches() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("provider never saw {n} launches");
    }
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_profile(ProviderProfile::new(TOKYO, "tokyo", "ap-tokyo-1"))
        .await;
    store
        .put_profile(ProviderProfile::new(ASHBURN, "ashburn", "us-ashburn-1"))
        .await;
    store
}

fn capacity() -> Result<(), ProviderError> {
    Err(ProviderError::out_of_capacity("Out of host capacity."))
}

fn levels(logs: &[TaskLogEntry]) -> Vec<LogLevel> {
    logs.iter().map(|l| l.level).collect()
}

// === Registry ===

#[tokio::test(start_paused = true)]
async fn concurrent_starts_spawn_exactly_one_executor() {
    let h = Harness::new(SimulatedProvider::new().with_latency(Duration::from_secs(5))).await;
    let task = h.create(TOKYO, ARM).await;

    let results = join_all((0..8).map(|_| h.engine.start_task(task.id))).await;
    let started = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(GrabError::AlreadyRunning(_))))
        .count();
    assert_eq!((started, rejected), (1, 7));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.provider.launches() >= 2);
    assert_eq!(h.provider.max_in_flight(), 1);
    assert_eq!(h.engine.registry().active().await, vec![task.id]);

    assert_eq!(h.engine.stop_task(task.id).await.unwrap(), StopOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_on_idle_task_changes_nothing() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;

    assert_eq!(h.engine.stop_task(task.id).await.unwrap(), StopOutcome::AlreadyIdle);
    assert_eq!(h.status(task.id).await, TaskStatus::Stopped);
    assert!(h.history(task.id).await.is_empty());

    let err = h.engine.stop_task(TaskId(404)).await.unwrap_err();
    assert!(matches!(err, GrabError::NotFound(TaskId(404))));
}

#[tokio::test(start_paused = true)]
async fn start_unknown_task_is_not_found() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let err = h.engine.start_task(TaskId(9)).await.unwrap_err();
    assert!(matches!(err, GrabError::NotFound(TaskId(9))));
    assert!(h.engine.registry().active().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_waiting_executor() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;

    assert_eq!(h.engine.start_task(task.id).await.unwrap(), StartOutcome::Started);
    tokio::time::sleep(Duration::from_secs(120)).await;

    let (a, b) = tokio::join!(h.engine.stop_task(task.id), h.engine.stop_task(task.id));
    assert_eq!(a.unwrap(), StopOutcome::Stopped);
    assert_eq!(b.unwrap(), StopOutcome::Stopped);

    assert_eq!(h.status(task.id).await, TaskStatus::Stopped);
    assert!(!h.engine.registry().is_active(task.id).await);
    let history = h.history(task.id).await;
    let stops = history.iter().filter(|l| l.message == "task stopped").count();
    assert_eq!(stops, 1);
    assert_eq!(history.last().map(|l| l.message.as_str()), Some("task stopped"));

    // a stopped task can be started again
    h.engine.start_task(task.id).await.unwrap();
    assert_eq!(h.status(task.id).await, TaskStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_provider_call() {
    let h = Harness::new(
        SimulatedProvider::new()
            .with_script([Ok(())])
            .with_latency(Duration::from_secs(60)),
    )
    .await;
    let task = h
        .engine
        .create_task(NewTask::new(TOKYO, ARM, "AD-1", "img").with_target(2))
        .await
        .unwrap();

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_launches(1).await;

    assert_eq!(h.engine.stop_task(task.id).await.unwrap(), StopOutcome::Stopped);
    let stored = h.engine.task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Stopped);
    assert_eq!(stored.current_count, 1);
    assert_eq!(stored.instances.len(), 1);
}

// === Executor ===

#[tokio::test(start_paused = true)]
async fn retryable_error_then_success() {
    let h = Harness::new(SimulatedProvider::new().with_script([capacity(), Ok(())])).await;
    let task = h.create(TOKYO, ARM).await;

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;

    let stored = h.engine.task(task.id).await.unwrap();
    assert_eq!(stored.current_count, 1);
    assert_eq!(stored.instances.len(), 1);
    assert_eq!(stored.instances[0].password.as_ref().map(String::len), Some(32));

    let history = h.history(task.id).await;
    let levels = levels(&history);
    let first_success = levels.iter().position(|l| *l == LogLevel::Success).unwrap();
    assert!(first_success > 0);
    assert!(levels[..first_success].iter().all(|l| *l == LogLevel::Info));
    assert!(levels[first_success..].iter().all(|l| *l == LogLevel::Success));
    assert!(history.iter().any(|l| l.message.contains("Out of host capacity.")));
    assert!(history[0].message.starts_with("task started"));
}

#[tokio::test(start_paused = true)]
async fn target_of_three_accumulates_results() {
    let h = Harness::new(SimulatedProvider::new().with_script([
        Ok(()),
        Err(ProviderError::throttled("Too many requests for the user")),
        Ok(()),
        Ok(()),
    ]))
    .await;
    let task = h
        .engine
        .create_task(NewTask::new(TOKYO, ARM, "AD-1", "img").with_target(3))
        .await
        .unwrap();

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;

    let instances = h.engine.instances(task.id).await.unwrap();
    assert_eq!(instances.len(), 3);
    let mut ids: Vec<&str> = instances.iter().map(|i| i.instance_id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(h.engine.task(task.id).await.unwrap().current_count, 3);
    assert_eq!(h.provider.launches(), 4);

    let provisioned: Vec<String> = h
        .history(task.id)
        .await
        .into_iter()
        .filter(|l| l.message.starts_with("provisioned instance"))
        .map(|l| l.message)
        .collect();
    assert!(provisioned[0].starts_with("provisioned instance 1/3"));
    assert!(provisioned[2].starts_with("provisioned instance 3/3"));
}

#[tokio::test(start_paused = true)]
async fn fatal_error_fails_task_with_one_error_log() {
    let h = Harness::new(SimulatedProvider::new().with_script([Err(ProviderError::new(
        ProviderErrorKind::InvalidRequest,
        "LimitExceeded: service limit reached",
    ))]))
    .await;
    let task = h.create(TOKYO, ARM).await;

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Failed).await;

    let history = h.history(task.id).await;
    let errors: Vec<&TaskLogEntry> = history.iter().filter(|l| l.level == LogLevel::Error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("LimitExceeded"));
    assert!(h.engine.instances(task.id).await.unwrap().is_empty());
    assert_eq!(h.provider.launches(), 1);

    // stop after the fact is a no-op
    assert_eq!(h.engine.stop_task(task.id).await.unwrap(), StopOutcome::AlreadyIdle);
    assert_eq!(h.status(task.id).await, TaskStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn already_satisfied_task_succeeds_without_launching() {
    let store = seeded_store().await;
    let task = store
        .insert(NewTask::new(TOKYO, ARM, "AD-1", "img"))
        .await
        .unwrap();
    store.increment_count(task.id).await.unwrap();
    let h = Harness::with(EngineConfig::default(), SimulatedProvider::new(), store).await;

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;
    assert_eq!(h.provider.launches(), 0);
}

struct PanickingProvider;

#[async_trait]
impl ProviderClient for PanickingProvider {
    async fn create_instance(&self, _spec: &LaunchSpec) -> Result<InstanceRef, ProviderError> {
        panic!("provider adapter bug");
    }

    async fn instance_state(&self, _i: &InstanceRef) -> Result<LifecycleState, ProviderError> {
        Ok(LifecycleState::Running)
    }

    async fn public_address(&self, _i: &InstanceRef) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    async fn resolve_subnet(&self) -> Result<String, ProviderError> {
        Ok("subnet".into())
    }

    async fn terminate_instance(&self, _i: &InstanceRef) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn executor_panic_marks_task_failed() {
    let store = seeded_store().await;
    let engine = Engine::builder(EngineConfig::default())
        .store(Arc::clone(&store) as Arc<dyn TaskStore>)
        .connector(Arc::new(StaticConnector::new(Arc::new(PanickingProvider))))
        .build()
        .unwrap();
    let mut events = engine.bus().subscribe();
    let task = engine
        .create_task(NewTask::new(TOKYO, ARM, "AD-1", "img"))
        .await
        .unwrap();

    engine.start_task(task.id).await.unwrap();
    for _ in 0..1_000 {
        if !engine.registry().is_active(task.id).await {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert_eq!(engine.task(task.id).await.unwrap().status, TaskStatus::Failed);
    let logs = engine.logs(task.id).await.unwrap();
    assert_eq!(logs[0].level, LogLevel::Error);
    assert!(logs[0].message.contains("provider adapter bug"));

    let mut kinds = Vec::new();
    while let Ok(ev) = events.try_recv() {
        kinds.push(ev.kind);
    }
    assert!(kinds.contains(&EventKind::ExecutorPanicked));
    assert!(kinds.contains(&EventKind::TaskRemoved));
}

#[tokio::test(start_paused = true)]
async fn missing_profile_fails_task() {
    let store = seeded_store().await;
    let task = store
        .insert(NewTask::new(ProfileId(77), ARM, "AD-1", "img"))
        .await
        .unwrap();
    let h = Harness::with(EngineConfig::default(), SimulatedProvider::new(), store).await;

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Failed).await;
    let history = h.history(task.id).await;
    assert_eq!(history.last().map(|l| l.level), Some(LogLevel::Error));
    assert!(history.last().is_some_and(|l| l.message.contains("profile 77")));
}

#[tokio::test(start_paused = true)]
async fn events_follow_attempt_lifecycle() {
    let h = Harness::new(SimulatedProvider::new().with_script([capacity(), Ok(())])).await;
    let task = h.create(TOKYO, ARM).await;
    let mut rx = h.engine.bus().subscribe();

    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    for expected in [
        EventKind::TaskStarted,
        EventKind::AttemptStarting,
        EventKind::AttemptRetryable,
        EventKind::InstanceProvisioned,
        EventKind::TaskSucceeded,
        EventKind::TaskRemoved,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
    let provisioned = events
        .iter()
        .find(|e| e.kind == EventKind::InstanceProvisioned)
        .unwrap();
    assert_eq!(provisioned.progress, Some((1, 1)));
    assert_eq!(provisioned.attempt, Some(2));
}

// === Engine operations ===

#[tokio::test(start_paused = true)]
async fn create_task_resolves_subnet() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;
    assert_eq!(task.status, TaskStatus::Stopped);
    assert!(task.subnet_id.is_some());
    assert_eq!(h.provider.subnet_lookups(), 1);

    let explicit = h
        .engine
        .create_task(NewTask::new(TOKYO, ARM, "AD-1", "img").with_subnet("subnet-x"))
        .await
        .unwrap();
    assert_eq!(explicit.subnet_id.as_deref(), Some("subnet-x"));

    let mut profile = ProviderProfile::new(ProfileId(3), "osaka", "ap-osaka-1");
    profile.subnet_id = Some("subnet-default".into());
    h.store.put_profile(profile).await;
    let defaulted = h.create(ProfileId(3), AMD).await;
    assert_eq!(defaulted.subnet_id.as_deref(), Some("subnet-default"));
    assert_eq!(h.provider.subnet_lookups(), 1);
}

#[tokio::test(start_paused = true)]
async fn create_task_validates_input() {
    let h = Harness::new(SimulatedProvider::new()).await;

    let err = h
        .engine
        .create_task(NewTask::new(TOKYO, ARM, "AD-1", "img").with_target(0))
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::InvalidTask(_)));

    let err = h
        .engine
        .create_task(NewTask::new(ProfileId(99), ARM, "AD-1", "img"))
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::ProfileNotFound(ProfileId(99))));
    assert!(h.engine.tasks().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_refuses_running_task() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();

    let err = h.engine.delete_task(task.id).await.unwrap_err();
    assert!(matches!(err, GrabError::TaskIsRunning(_)));

    h.engine.stop_task(task.id).await.unwrap();
    h.engine.delete_task(task.id).await.unwrap();
    assert!(matches!(
        h.engine.task(task.id).await.unwrap_err(),
        GrabError::NotFound(_)
    ));
    assert!(matches!(
        h.engine.logs(task.id).await.unwrap_err(),
        GrabError::NotFound(_)
    ));
    assert!(h.store.logs(task.id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_running_status_for_recovery() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    h.engine.shutdown().await.unwrap();
    assert_eq!(h.status(task.id).await, TaskStatus::Running);
    assert!(h.engine.registry().active().await.is_empty());
    assert!(matches!(
        h.engine.start_task(task.id).await.unwrap_err(),
        GrabError::ShuttingDown
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_reports_executors_stuck_in_provider_calls() {
    let cfg = EngineConfig {
        grace_secs: 5,
        ..EngineConfig::default()
    };
    let h = Harness::with(
        cfg,
        SimulatedProvider::new().with_latency(Duration::from_secs(1_000)),
        seeded_store().await,
    )
    .await;
    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_launches(1).await;

    match h.engine.shutdown().await {
        Err(RuntimeError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_secs(5));
            assert_eq!(stuck, vec![task.id]);
        }
        other => panic!("expected GraceExceeded, got {other:?}"),
    }
}

// === Recovery ===

#[tokio::test(start_paused = true)]
async fn recovery_resumes_from_persisted_count() {
    let store = seeded_store().await;
    let task = store
        .insert(NewTask::new(TOKYO, ARM, "AD-1", "img").with_target(3))
        .await
        .unwrap();
    store
        .append_instance_result(
            task.id,
            InstanceResult {
                instance_id: "ocid1.instance.before-crash".into(),
                public_ip: None,
                password: None,
            },
        )
        .await
        .unwrap();
    store.increment_count(task.id).await.unwrap();
    store.update_status(task.id, TaskStatus::Running).await.unwrap();
    let idle = store
        .insert(NewTask::new(TOKYO, ARM, "AD-1", "img"))
        .await
        .unwrap();

    let h = Harness::with(
        EngineConfig::default(),
        SimulatedProvider::new().with_script([Ok(()), Ok(())]),
        store,
    )
    .await;
    let report = h.engine.init().await.unwrap();
    assert_eq!(report.recovered, vec![task.id]);
    assert!(report.is_clean());

    h.wait_for_status(task.id, TaskStatus::Success).await;
    let stored = h.engine.task(task.id).await.unwrap();
    assert_eq!(stored.current_count, 3);
    assert_eq!(stored.instances[0].instance_id, "ocid1.instance.before-crash");
    assert_eq!(h.provider.launches(), 2);
    assert_eq!(h.status(idle.id).await, TaskStatus::Stopped);
    assert!(h.history(task.id).await[0].message.contains("resuming at 1/3"));
}

#[tokio::test(start_paused = true)]
async fn recovery_skips_active_tasks_and_tolerates_empty_store() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let report = h.engine.init().await.unwrap();
    assert!(report.recovered.is_empty() && report.skipped.is_empty());

    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();
    let store: Arc<dyn TaskStore> = h.store.clone();
    let report = StartupRecovery::new(store, Arc::clone(h.engine.registry()))
        .run()
        .await
        .unwrap();
    assert_eq!(report.skipped, vec![task.id]);
    assert!(report.recovered.is_empty());
}

// === Reactive trigger ===

#[tokio::test(start_paused = true)]
async fn notice_starts_matching_stopped_tasks() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let arm_tokyo = h.create(TOKYO, ARM).await;
    let amd_tokyo = h.create(TOKYO, AMD).await;
    let arm_ashburn = h.create(ASHBURN, ARM).await;
    let orphan = h
        .store
        .insert(NewTask::new(ProfileId(50), ARM, "AD-1", "img"))
        .await
        .unwrap();

    let report = h
        .engine
        .trigger()
        .handle_notice("补货啦\n开机地区：AP-Tokyo-1\nCPU类型：ARM")
        .await
        .unwrap();
    assert_eq!(report.started, vec![arm_tokyo.id]);
    assert_eq!(report.matched(), 1);
    assert_eq!(h.status(arm_tokyo.id).await, TaskStatus::Running);
    for id in [amd_tokyo.id, arm_ashburn.id, orphan.id] {
        assert_eq!(h.status(id).await, TaskStatus::Stopped);
    }
    assert!(h.history(arm_tokyo.id).await[0].message.contains("stock notice"));

    let report = h
        .engine
        .trigger()
        .handle_notice("Region: ap-tokyo-1")
        .await
        .unwrap();
    assert_eq!(report.started, vec![amd_tokyo.id]);
}

#[tokio::test(start_paused = true)]
async fn notice_with_unknown_cpu_or_no_region_starts_nothing() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let task = h.create(TOKYO, ARM).await;

    let report = h
        .engine
        .trigger()
        .handle_notice("开机地区：ap-tokyo-1\nCPU类型：INTEL")
        .await
        .unwrap();
    assert_eq!(report.matched(), 0);

    let report = h.engine.trigger().handle_notice("stock is back").await.unwrap();
    assert!(report.notice.is_none());
    assert_eq!(h.status(task.id).await, TaskStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failed_reactive_start_does_not_block_others() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let busy = h.create(TOKYO, ARM).await;
    let idle = h.create(TOKYO, ARM).await;

    // persisted `stopped` while an executor is still alive
    h.engine.start_task(busy.id).await.unwrap();
    h.store.update_status(busy.id, TaskStatus::Stopped).await.unwrap();

    let report = h
        .engine
        .trigger()
        .handle_notice("开机地区：ap-tokyo-1")
        .await
        .unwrap();
    assert_eq!(report.started, vec![idle.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, busy.id);
    assert!(matches!(report.failed[0].1, GrabError::AlreadyRunning(_)));
}

#[tokio::test(start_paused = true)]
async fn auto_grab_toggle_controls_subscription() {
    let h = Harness::new(SimulatedProvider::new()).await;
    let channel = h.engine.config().stock_channel.clone();
    let first = h.create(TOKYO, ARM).await;
    let second = h.create(TOKYO, ARM).await;

    assert!(h.engine.set_auto_grab(true).await.unwrap().auto_grab_enabled);
    h.engine.set_auto_grab(true).await.unwrap();
    assert!(h.engine.trigger().is_enabled().await);
    assert_eq!(h.source.subscriber_count(&channel), 1);

    h.source.publish(&channel, "开机地区：ap-tokyo-1\nCPU类型：ARM");
    for _ in 0..100 {
        let registry = h.engine.registry();
        if registry.is_active(first.id).await && registry.is_active(second.id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.engine.registry().is_active(first.id).await);
    assert!(h.engine.registry().is_active(second.id).await);
    h.engine.stop_task(second.id).await.unwrap();

    assert!(!h.engine.set_auto_grab(false).await.unwrap().auto_grab_enabled);
    assert!(!h.engine.trigger().is_enabled().await);
    assert_eq!(h.source.subscriber_count(&channel), 0);
    assert!(!h.engine.settings().await.unwrap().auto_grab_enabled);

    h.source.publish(&channel, "开机地区：ap-tokyo-1\nCPU类型：ARM");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!h.engine.registry().is_active(second.id).await);
}

#[tokio::test(start_paused = true)]
async fn init_subscribes_when_setting_is_persisted() {
    let store = seeded_store().await;
    store
        .save_settings(GlobalSettings {
            auto_grab_enabled: true,
        })
        .await
        .unwrap();
    let h = Harness::with(EngineConfig::default(), SimulatedProvider::new(), store).await;
    assert!(!h.engine.trigger().is_enabled().await);

    h.engine.init().await.unwrap();
    assert!(h.engine.trigger().is_enabled().await);

    h.engine.shutdown().await.unwrap();
    assert!(!h.engine.trigger().is_enabled().await);
}

// === Store failures ===

/// Memory store that fails selected reads and writes.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing_log_prefix: Option<&'static str>,
    broken_profile: Option<ProfileId>,
}

impl FaultyStore {
    fn backend_down() -> StoreError {
        StoreError::Backend("log table down".into())
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn insert(&self, task: NewTask) -> Result<GrabTask, StoreError> {
        self.inner.insert(task).await
    }

    async fn load(&self, id: TaskId) -> Result<Option<GrabTask>, StoreError> {
        self.inner.load(id).await
    }

    async fn list(&self) -> Result<Vec<GrabTask>, StoreError> {
        self.inner.list().await
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<GrabTask>, StoreError> {
        self.inner.find_by_status(status).await
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        self.inner.update_status(id, status).await
    }

    async fn increment_count(&self, id: TaskId) -> Result<u32, StoreError> {
        self.inner.increment_count(id).await
    }

    async fn append_instance_result(
        &self,
        id: TaskId,
        result: InstanceResult,
    ) -> Result<(), StoreError> {
        self.inner.append_instance_result(id, result).await
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn append_log(
        &self,
        id: TaskId,
        level: LogLevel,
        message: String,
    ) -> Result<(), StoreError> {
        if self
            .failing_log_prefix
            .is_some_and(|prefix| message.starts_with(prefix))
        {
            return Err(Self::backend_down());
        }
        self.inner.append_log(id, level, message).await
    }

    async fn logs(&self, id: TaskId) -> Result<Vec<TaskLogEntry>, StoreError> {
        self.inner.logs(id).await
    }

    async fn load_profile(&self, id: ProfileId) -> Result<Option<ProviderProfile>, StoreError> {
        if self.broken_profile == Some(id) {
            return Err(Self::backend_down());
        }
        self.inner.load_profile(id).await
    }

    async fn settings(&self) -> Result<GlobalSettings, StoreError> {
        self.inner.settings().await
    }

    async fn save_settings(&self, settings: GlobalSettings) -> Result<(), StoreError> {
        self.inner.save_settings(settings).await
    }
}

fn engine_over(store: FaultyStore) -> Arc<Engine> {
    Engine::builder(EngineConfig::default())
        .store(Arc::new(store))
        .connector(Arc::new(StaticConnector::new(Arc::new(SimulatedProvider::new()))))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn failed_start_log_restores_previous_status() {
    let inner = seeded_store().await;
    let task = inner
        .insert(NewTask::new(TOKYO, ARM, "AD-1", "img"))
        .await
        .unwrap();
    let engine = engine_over(FaultyStore {
        inner: Arc::clone(&inner),
        failing_log_prefix: Some("task started"),
        broken_profile: None,
    });

    let err = engine.start_task(task.id).await.unwrap_err();
    assert!(matches!(err, GrabError::Store(StoreError::Backend(_))));
    assert_eq!(
        inner.load(task.id).await.unwrap().unwrap().status,
        TaskStatus::Stopped
    );
    assert!(!engine.registry().is_active(task.id).await);

    // the task is not stranded as `running`
    assert_eq!(engine.stop_task(task.id).await.unwrap(), StopOutcome::AlreadyIdle);
    engine.delete_task(task.id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unreadable_profile_does_not_block_other_notice_matches() {
    let inner = seeded_store().await;
    inner
        .put_profile(ProviderProfile::new(ProfileId(3), "tokyo-b", "ap-tokyo-1"))
        .await;
    let unreadable = inner
        .insert(NewTask::new(ProfileId(3), ARM, "AD-1", "img"))
        .await
        .unwrap();
    let readable = inner
        .insert(NewTask::new(TOKYO, ARM, "AD-1", "img"))
        .await
        .unwrap();
    let engine = engine_over(FaultyStore {
        inner: Arc::clone(&inner),
        failing_log_prefix: None,
        broken_profile: Some(ProfileId(3)),
    });

    let report = engine
        .trigger()
        .handle_notice("开机地区：ap-tokyo-1\nCPU类型：ARM")
        .await
        .unwrap();
    assert_eq!(report.started, vec![readable.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, unreadable.id);
    assert!(matches!(report.failed[0].1, GrabError::Store(_)));
    assert!(engine.registry().is_active(readable.id).await);
}

// === Instance termination ===

#[tokio::test(start_paused = true)]
async fn terminate_instance_of_provisioned_task() {
    let h = Harness::new(SimulatedProvider::new().with_script([Ok(())])).await;
    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;
    let instance = h.engine.instances(task.id).await.unwrap()[0].instance_id.clone();

    h.engine.terminate_instance(task.id, &instance).await.unwrap();
    assert_eq!(h.provider.terminated().await, vec![instance.clone()]);
    let latest = &h.engine.logs(task.id).await.unwrap()[0];
    assert_eq!(latest.level, LogLevel::Info);
    assert_eq!(latest.message, format!("instance {instance} terminated"));
    // results keep the provisioning record
    assert_eq!(h.engine.instances(task.id).await.unwrap().len(), 1);

    let err = h
        .engine
        .terminate_instance(task.id, "ocid1.instance.other")
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::InstanceNotFound { .. }));
    let err = h
        .engine
        .terminate_instance(TaskId(404), &instance)
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::NotFound(TaskId(404))));
    assert_eq!(h.provider.terminated().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_termination_is_logged_and_returned() {
    let h = Harness::new(
        SimulatedProvider::new()
            .with_script([Ok(())])
            .with_terminate_failure(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                "NotAuthorizedOrNotFound",
            )),
    )
    .await;
    let task = h.create(TOKYO, ARM).await;
    h.engine.start_task(task.id).await.unwrap();
    h.wait_for_status(task.id, TaskStatus::Success).await;
    let instance = h.engine.instances(task.id).await.unwrap()[0].instance_id.clone();

    let err = h
        .engine
        .terminate_instance(task.id, &instance)
        .await
        .unwrap_err();
    assert!(matches!(err, GrabError::Provider(_)));
    assert!(h.provider.terminated().await.is_empty());
    let latest = &h.engine.logs(task.id).await.unwrap()[0];
    assert_eq!(latest.level, LogLevel::Error);
    assert!(latest.message.contains("NotAuthorizedOrNotFound"));
}
