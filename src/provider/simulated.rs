//! Scripted in-process [`ProviderClient`].
//!
//! Each `create_instance` call consumes the next scripted outcome; once the
//! script is empty the fallback outcome applies (by default the provider is
//! out of capacity, which is what a real account sees most of the time).
//! Launched instances are immediately `Running` and get an address from
//! `203.0.113.0/24`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::provider::{InstanceRef, LaunchSpec, LifecycleState, ProviderClient};

const SIMULATED_SUBNET: &str = "ocid1.subnet.oc1..simulated";

/// Provider double driven by a queue of launch outcomes.
///
/// ## Example
/// ```rust
/// use capgrab::{ProviderError, SimulatedProvider};
///
/// let provider = SimulatedProvider::new()
///     .with_script([Err(ProviderError::out_of_capacity("Out of host capacity.")), Ok(())]);
/// assert_eq!(provider.launches(), 0);
/// ```
pub struct SimulatedProvider {
    script: Mutex<VecDeque<Result<(), ProviderError>>>,
    fallback: Result<(), ProviderError>,
    latency: Duration,
    launched: Mutex<Vec<LaunchSpec>>,
    launches: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    subnet_lookups: AtomicU32,
    terminated: Mutex<Vec<String>>,
    terminate_failure: Option<ProviderError>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    /// Creates a provider with an empty script and an out-of-capacity fallback.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(ProviderError::out_of_capacity("Out of host capacity.")),
            latency: Duration::ZERO,
            launched: Mutex::new(Vec::new()),
            launches: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            subnet_lookups: AtomicU32::new(0),
            terminated: Mutex::new(Vec::new()),
            terminate_failure: None,
        }
    }

    /// Replaces the launch script.
    #[must_use]
    pub fn with_script(mut self, outcomes: impl IntoIterator<Item = Result<(), ProviderError>>) -> Self {
        self.script = Mutex::new(outcomes.into_iter().collect());
        self
    }

    /// Outcome used once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, outcome: Result<(), ProviderError>) -> Self {
        self.fallback = outcome;
        self
    }

    /// Delay applied to every `create_instance` call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every `terminate_instance` call fail with `err`.
    #[must_use]
    pub fn with_terminate_failure(mut self, err: ProviderError) -> Self {
        self.terminate_failure = Some(err);
        self
    }

    /// Appends one outcome to the script.
    pub async fn push(&self, outcome: Result<(), ProviderError>) {
        self.script.lock().await.push_back(outcome);
    }

    /// Number of `create_instance` calls so far.
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently executing `create_instance` calls.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of `resolve_subnet` calls so far.
    pub fn subnet_lookups(&self) -> u32 {
        self.subnet_lookups.load(Ordering::SeqCst)
    }

    /// Launch specs of successful launches, in order.
    pub async fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().await.clone()
    }

    /// Ids of successfully terminated instances, in order.
    pub async fn terminated(&self) -> Vec<String> {
        self.terminated.lock().await.clone()
    }
}

#[async_trait]
impl ProviderClient for SimulatedProvider {
    async fn create_instance(&self, spec: &LaunchSpec) -> Result<InstanceRef, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.clone(),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        outcome?;
        self.launched.lock().await.push(spec.clone());
        Ok(InstanceRef::new(format!("ocid1.instance.oc1..sim{n}")))
    }

    async fn instance_state(
        &self,
        _instance: &InstanceRef,
    ) -> Result<LifecycleState, ProviderError> {
        Ok(LifecycleState::Running)
    }

    async fn public_address(
        &self,
        instance: &InstanceRef,
    ) -> Result<Option<String>, ProviderError> {
        let host = instance
            .id
            .rsplit("sim")
            .next()
            .and_then(|n| n.parse::<u32>().ok())
            .map(|n| n % 254 + 1)
            .unwrap_or(1);
        Ok(Some(format!("203.0.113.{host}")))
    }

    async fn resolve_subnet(&self) -> Result<String, ProviderError> {
        self.subnet_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(SIMULATED_SUBNET.to_string())
    }

    async fn terminate_instance(&self, instance: &InstanceRef) -> Result<(), ProviderError> {
        if let Some(err) = &self.terminate_failure {
            return Err(err.clone());
        }
        self.terminated.lock().await.push(instance.id.clone());
        Ok(())
    }
}
