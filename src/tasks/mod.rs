//! # Grab tasks: data model and launch metadata.
//!
//! - [`GrabTask`] / [`NewTask`] - persisted task and its creation request
//! - [`TaskStatus`], [`AuthType`], [`LogLevel`] - lifecycle and audit enums
//! - [`TaskLogEntry`] - append-only user-visible log row
//! - [`ProviderProfile`], [`GlobalSettings`] - records a task depends on
//! - [`LaunchMetadata`] - per-launch cloud-init / authorized-key metadata

mod metadata;
mod model;

pub use metadata::{LaunchMetadata, generate_password};
pub use model::{
    AuthType, GlobalSettings, GrabTask, InstanceResult, LogLevel, NewTask, ProfileId,
    ProviderCredentials, ProviderProfile, ShapeConfig, TaskId, TaskLogEntry, TaskStatus,
};
