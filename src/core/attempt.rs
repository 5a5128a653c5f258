//! # One provisioning attempt.
//!
//! Launch → wait until running → read public address. The attempt is not
//! cancellable; the executor only observes cancellation between attempts.
//!
//! ```text
//! LaunchMetadata::for_task ─► create_instance ─► await_running ─► public_address
//!          │                        │                 │                 │
//!          └── InvalidRequest       └── capacity /    └── Timeout       └── Ok(InstanceResult)
//!                                       throttle / …
//! ```

use crate::error::ProviderError;
use crate::provider::{LaunchSpec, PollPolicy, ProviderClient};
use crate::tasks::{GrabTask, InstanceResult, LaunchMetadata};

/// Runs one attempt for `task` and returns the provisioned instance.
pub(crate) async fn provision_once(
    client: &dyn ProviderClient,
    task: &GrabTask,
    poll: PollPolicy,
    password_length: usize,
) -> Result<InstanceResult, ProviderError> {
    let (metadata, password) = LaunchMetadata::for_task(task, password_length)?;
    let spec = LaunchSpec {
        display_name: format!("capgrab-{}-{}", task.id, task.current_count.saturating_add(1)),
        shape: task.shape.clone(),
        availability_domain: task.availability_domain.clone(),
        image_id: task.image_id.clone(),
        subnet_id: task.subnet_id.clone(),
        boot_volume_size: task.boot_volume_size,
        shape_config: task.shape_config(),
        metadata: metadata.to_map(),
    };

    let instance = client.create_instance(&spec).await?;
    client.await_running(&instance, poll).await?;
    let public_ip = client.public_address(&instance).await?;

    Ok(InstanceResult {
        instance_id: instance.id,
        public_ip,
        password,
    })
}
