//! # Grab task data model.
//!
//! [`GrabTask`] is the persisted unit of work: a request to provision
//! `target_count` instances of one launch definition. Its [`TaskStatus`] is the
//! single authoritative lifecycle field; [`TaskLogEntry`] rows form the
//! append-only audit trail shown to users.
//!
//! ## Lifecycle
//! ```text
//!            create                start              current == target
//!  (none) ─────────► stopped ───────────► running ──────────────────► success
//!                      ▲  ▲                 │  │
//!                      │  └──── stop ───────┘  └── fatal error ──► failed
//!                      └────── restart allowed from stopped / failed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GrabError;

/// Identifier of a grab task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a provider profile (credentials + region).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Stopped,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    /// `true` for statuses no executor will move the task out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the root account of a provisioned instance is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// A random root password is generated per instance and injected via cloud-init.
    Password,
    /// The task's public key is installed as authorized key.
    SshKey,
}

/// One provisioned instance accumulated under a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResult {
    pub instance_id: String,
    pub public_ip: Option<String>,
    /// Generated root password; `None` for ssh-key tasks.
    pub password: Option<String>,
}

/// Explicit CPU/memory sizing for flexible shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeConfig {
    pub ocpus: u32,
    pub memory_in_gbs: u32,
}

/// A persisted grab task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabTask {
    pub id: TaskId,
    pub profile_id: ProfileId,
    pub shape: String,
    pub availability_domain: String,
    pub image_id: String,
    pub auth_type: AuthType,
    pub ssh_key: Option<String>,
    pub ocpus: Option<u32>,
    pub memory_in_gbs: Option<u32>,
    pub subnet_id: Option<String>,
    pub boot_volume_size: Option<u32>,
    /// Base seconds between attempts (jittered by the retry policy).
    pub wait_time: u64,
    pub target_count: u32,
    pub current_count: u32,
    pub status: TaskStatus,
    /// Instances won so far, in provisioning order.
    pub instances: Vec<InstanceResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GrabTask {
    /// `true` once every requested instance has been provisioned.
    pub fn is_satisfied(&self) -> bool {
        self.current_count >= self.target_count
    }

    /// Shape sizing override; only applied when both values are set.
    pub fn shape_config(&self) -> Option<ShapeConfig> {
        match (self.ocpus, self.memory_in_gbs) {
            (Some(ocpus), Some(memory_in_gbs)) => Some(ShapeConfig {
                ocpus,
                memory_in_gbs,
            }),
            _ => None,
        }
    }
}

/// Definition of a task to be created.
///
/// ## Example
/// ```rust
/// use capgrab::{AuthType, NewTask, ProfileId};
///
/// let task = NewTask::new(ProfileId(1), "VM.Standard.A1.Flex", "AD-1", "ocid1.image.x")
///     .with_target(2)
///     .with_shape_config(4, 24);
/// assert_eq!(task.auth_type, AuthType::Password);
/// assert!(task.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub profile_id: ProfileId,
    pub shape: String,
    pub availability_domain: String,
    pub image_id: String,
    pub auth_type: AuthType,
    pub ssh_key: Option<String>,
    pub ocpus: Option<u32>,
    pub memory_in_gbs: Option<u32>,
    pub subnet_id: Option<String>,
    pub boot_volume_size: Option<u32>,
    pub wait_time: u64,
    pub target_count: u32,
}

impl NewTask {
    /// Default base wait between attempts, in seconds.
    pub const DEFAULT_WAIT_SECS: u64 = 30;

    /// Creates a password-auth task for one instance with the default wait.
    pub fn new(
        profile_id: ProfileId,
        shape: impl Into<String>,
        availability_domain: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            profile_id,
            shape: shape.into(),
            availability_domain: availability_domain.into(),
            image_id: image_id.into(),
            auth_type: AuthType::Password,
            ssh_key: None,
            ocpus: None,
            memory_in_gbs: None,
            subnet_id: None,
            boot_volume_size: None,
            wait_time: Self::DEFAULT_WAIT_SECS,
            target_count: 1,
        }
    }

    /// Switches to ssh-key auth with the given authorized key.
    #[must_use]
    pub fn with_ssh_key(mut self, key: impl Into<String>) -> Self {
        self.auth_type = AuthType::SshKey;
        self.ssh_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target_count: u32) -> Self {
        self.target_count = target_count;
        self
    }

    #[must_use]
    pub fn with_wait_time(mut self, secs: u64) -> Self {
        self.wait_time = secs;
        self
    }

    #[must_use]
    pub fn with_shape_config(mut self, ocpus: u32, memory_in_gbs: u32) -> Self {
        self.ocpus = Some(ocpus);
        self.memory_in_gbs = Some(memory_in_gbs);
        self
    }

    #[must_use]
    pub fn with_boot_volume(mut self, size_gb: u32) -> Self {
        self.boot_volume_size = Some(size_gb);
        self
    }

    #[must_use]
    pub fn with_subnet(mut self, subnet_id: impl Into<String>) -> Self {
        self.subnet_id = Some(subnet_id.into());
        self
    }

    /// Checks the definition before it is persisted.
    ///
    /// # Errors
    /// [`GrabError::InvalidTask`] when `target_count` is zero, a required
    /// identifier is blank, or ssh-key auth has no key.
    pub fn validate(&self) -> Result<(), GrabError> {
        if self.target_count == 0 {
            return Err(GrabError::InvalidTask("target_count must be at least 1".into()));
        }
        for (field, value) in [
            ("shape", &self.shape),
            ("availability_domain", &self.availability_domain),
            ("image_id", &self.image_id),
        ] {
            if value.trim().is_empty() {
                return Err(GrabError::InvalidTask(format!("{field} must not be empty")));
            }
        }
        if self.auth_type == AuthType::SshKey
            && self.ssh_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            return Err(GrabError::InvalidTask("ssh_key auth requires a public key".into()));
        }
        Ok(())
    }

    /// Materializes the persisted record (status `stopped`, no progress).
    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> GrabTask {
        GrabTask {
            id,
            profile_id: self.profile_id,
            shape: self.shape,
            availability_domain: self.availability_domain,
            image_id: self.image_id,
            auth_type: self.auth_type,
            ssh_key: self.ssh_key,
            ocpus: self.ocpus,
            memory_in_gbs: self.memory_in_gbs,
            subnet_id: self.subnet_id,
            boot_volume_size: self.boot_volume_size,
            wait_time: self.wait_time,
            target_count: self.target_count,
            current_count: 0,
            status: TaskStatus::Stopped,
            instances: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Severity of a task log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Error => "ERROR",
        })
    }
}

/// Append-only, user-visible progress record of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: u64,
    pub task_id: TaskId,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Credentials of a provider account. Never logged.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub tenancy: String,
    pub user: String,
    pub fingerprint: String,
    pub private_key: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("tenancy", &self.tenancy)
            .field("user", &self.user)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Provider account a task provisions into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProfileId,
    pub name: String,
    /// Region identifier, e.g. `us-ashburn-1`.
    pub region: String,
    pub credentials: ProviderCredentials,
    /// Subnet used when a task does not name one.
    pub subnet_id: Option<String>,
}

impl ProviderProfile {
    pub fn new(id: ProfileId, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            region: region.into(),
            credentials: ProviderCredentials::default(),
            subnet_id: None,
        }
    }
}

/// Process-wide persisted settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Whether the reactive trigger listens for stock notices.
    pub auto_grab_enabled: bool,
}
