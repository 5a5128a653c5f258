//! # Example: Simulated Grab
//!
//! Runs the engine against the in-process provider double:
//! - a manually started task that wins capacity on its third attempt;
//! - a task started by a stock notice once auto grab is enabled.
//!
//! Run with: `cargo run --example simulated_grab`
//! (set `RUST_LOG=debug` for event-level output).

use std::{sync::Arc, time::Duration};

use capgrab::{
    BroadcastSource, Engine, EngineConfig, LogWriter, MemoryStore, NewTask, ProfileId,
    ProviderError, ProviderProfile, SimulatedProvider, StaticConnector, Subscribe, TaskId,
    TaskStatus,
};
use tracing_subscriber::EnvFilter;

const TOKYO: ProfileId = ProfileId(1);

/// Polls until the task leaves `running` and its executor is gone.
async fn settle(engine: &Engine, id: TaskId) -> anyhow::Result<TaskStatus> {
    loop {
        let status = engine.task(id).await?.status;
        if status != TaskStatus::Running && !engine.registry().is_active(id).await {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

async fn print_history(engine: &Engine, id: TaskId) -> anyhow::Result<()> {
    let mut logs = engine.logs(id).await?;
    logs.reverse();
    println!("--- task {id} ---");
    for entry in logs {
        println!("[{:<7}] {}", entry.level, entry.message);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut cfg = EngineConfig::default();
    cfg.jitter_spread_secs = 1;
    cfg.grace_secs = 5;

    let store = Arc::new(MemoryStore::new());
    store
        .put_profile(ProviderProfile::new(TOKYO, "tokyo", "ap-tokyo-1"))
        .await;

    let provider = Arc::new(
        SimulatedProvider::new()
            .with_script([
                Err(ProviderError::out_of_capacity("Out of host capacity.")),
                Err(ProviderError::throttled("Too many requests for the user")),
                Ok(()),
            ])
            .with_latency(Duration::from_millis(200)),
    );
    let source = Arc::new(BroadcastSource::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];

    let engine = Engine::builder(cfg)
        .store(store)
        .connector(Arc::new(StaticConnector::new(provider.clone())))
        .event_source(source.clone())
        .subscribers(subs)
        .build()?;
    let report = engine.init().await?;
    println!("recovered {} task(s)", report.recovered.len());

    // Manual start: two retryable failures, then success.
    let arm = engine
        .create_task(
            NewTask::new(TOKYO, "VM.Standard.A1.Flex", "AD-1", "ocid1.image.oc1..demo")
                .with_shape_config(4, 24)
                .with_wait_time(2),
        )
        .await?;
    engine.start_task(arm.id).await?;
    println!("task {} finished as {}", arm.id, settle(&engine, arm.id).await?);
    print_history(&engine, arm.id).await?;

    // Reactive start: a notice for AMD capacity in Tokyo.
    let amd = engine
        .create_task(
            NewTask::new(TOKYO, "VM.Standard.E2.1.Micro", "AD-1", "ocid1.image.oc1..demo")
                .with_wait_time(2),
        )
        .await?;
    engine.set_auto_grab(true).await?;
    provider.push(Ok(())).await;
    let channel = engine.config().stock_channel.clone();
    source.publish(&channel, "补货通知\n开机地区：ap-tokyo-1\nCPU类型：AMD");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("task {} finished as {}", amd.id, settle(&engine, amd.id).await?);
    print_history(&engine, amd.id).await?;

    for instance in engine.instances(arm.id).await? {
        println!(
            "{} {}",
            instance.instance_id,
            instance.public_ip.as_deref().unwrap_or("-")
        );
    }

    engine.shutdown().await?;
    Ok(())
}
