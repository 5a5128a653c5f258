//! # Cloud provider boundary.
//!
//! The engine talks to a compute provider only through [`ProviderClient`].
//! Adapters translate the provider's responses into [`ProviderError`] with a
//! structured [`ProviderErrorKind`](crate::ProviderErrorKind); the executor
//! never inspects message text.
//!
//! - [`ProviderClient`] - one provider account (profile)
//! - [`ProviderConnector`] - builds a client for a [`ProviderProfile`]
//! - [`LaunchSpec`] / [`InstanceRef`] / [`LifecycleState`] - wire-neutral request/response types
//! - [`PollPolicy`] - bounds of the "wait until running" poll
//! - [`SimulatedProvider`] - scripted in-process provider

mod simulated;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::tasks::{ProviderProfile, ShapeConfig};

pub use simulated::SimulatedProvider;

/// Everything needed to launch one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub display_name: String,
    pub shape: String,
    pub availability_domain: String,
    pub image_id: String,
    pub subnet_id: Option<String>,
    pub boot_volume_size: Option<u32>,
    pub shape_config: Option<ShapeConfig>,
    /// Instance metadata (`user_data` or `ssh_authorized_keys`).
    pub metadata: BTreeMap<String, String>,
}

/// Provider-side identifier of a launched instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub id: String,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Provider-reported lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Provisioning,
    Starting,
    Running,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
}

impl LifecycleState {
    /// `true` when the instance can never reach `Running` again.
    pub fn is_gone(&self) -> bool {
        matches!(self, LifecycleState::Terminating | LifecycleState::Terminated)
    }
}

/// Bounds of the poll that waits for a new instance to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of state reads before giving up.
    pub attempts: u32,
    /// Pause between reads.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

/// Client for one provider account.
///
/// Calls are not cancellable from the engine's side: a stop request takes
/// effect after the in-flight call returns.
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
    /// Requests a new instance.
    async fn create_instance(&self, spec: &LaunchSpec) -> Result<InstanceRef, ProviderError>;

    /// Reads the current lifecycle state.
    async fn instance_state(&self, instance: &InstanceRef)
    -> Result<LifecycleState, ProviderError>;

    /// Returns the public IPv4 address of the instance's primary interface, if any.
    async fn public_address(&self, instance: &InstanceRef)
    -> Result<Option<String>, ProviderError>;

    /// Returns a usable subnet, creating the network if the account has none.
    async fn resolve_subnet(&self) -> Result<String, ProviderError>;

    /// Terminates an instance.
    async fn terminate_instance(&self, instance: &InstanceRef) -> Result<(), ProviderError>;

    /// Polls [`instance_state`](Self::instance_state) until the instance is running.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::Timeout`] after `poll.attempts` reads without `Running`
    /// - [`ProviderErrorKind::Other`] when the instance is terminated while waiting
    /// - any error from `instance_state`
    async fn await_running(
        &self,
        instance: &InstanceRef,
        poll: PollPolicy,
    ) -> Result<(), ProviderError> {
        for read in 1..=poll.attempts {
            let state = self.instance_state(instance).await?;
            if state == LifecycleState::Running {
                return Ok(());
            }
            if state.is_gone() {
                return Err(ProviderError::new(
                    ProviderErrorKind::Other,
                    format!("instance {} entered {state:?} while starting", instance.id),
                ));
            }
            if read < poll.attempts {
                tokio::time::sleep(poll.interval).await;
            }
        }
        Err(ProviderError::new(
            ProviderErrorKind::Timeout,
            format!(
                "instance {} not running after {} checks",
                instance.id, poll.attempts
            ),
        ))
    }
}

/// Builds provider clients from stored profiles.
pub trait ProviderConnector: Send + Sync + 'static {
    /// Returns a client authenticated as `profile`.
    ///
    /// # Errors
    /// [`ProviderErrorKind::Unauthorized`] or [`ProviderErrorKind::InvalidRequest`]
    /// when the profile's credentials are unusable.
    fn connect(&self, profile: &ProviderProfile) -> Result<Arc<dyn ProviderClient>, ProviderError>;
}

/// Connector that hands out the same client for every profile.
pub struct StaticConnector {
    client: Arc<dyn ProviderClient>,
}

impl StaticConnector {
    pub fn new(client: Arc<dyn ProviderClient>) -> Self {
        Self { client }
    }
}

impl ProviderConnector for StaticConnector {
    fn connect(&self, _profile: &ProviderProfile) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        Ok(Arc::clone(&self.client))
    }
}
