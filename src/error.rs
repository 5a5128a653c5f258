//! Error types used by the grab engine, its store and its provider boundary.
//!
//! This module defines the error enums of the crate:
//!
//! - [`GrabError`] - errors surfaced to callers of engine/registry operations.
//! - [`RuntimeError`] - errors raised by the engine lifecycle itself (shutdown).
//! - [`ProviderError`] - structured failures reported by a cloud provider adapter.
//! - [`StoreError`] - failures of the persistent [`TaskStore`](crate::TaskStore).
//! - [`SourceError`] - failures of the external notice [`EventSource`](crate::EventSource).
//! - [`ConfigError`] - failures loading [`EngineConfig`](crate::EngineConfig).
//!
//! All of them provide `as_label` for logs/metrics. [`ProviderErrorKind::is_retryable`]
//! carries the only retry contract: capacity exhaustion and throttling are retried,
//! everything else terminates the task.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::tasks::{ProfileId, TaskId};

/// # Errors produced by engine and registry operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GrabError {
    /// No task with this id exists in the store.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The task already has a live executor.
    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    /// The operation is refused while the task is running (e.g. delete).
    #[error("task {0} is running; stop it first")]
    TaskIsRunning(TaskId),

    /// The provider profile referenced by a task does not exist.
    #[error("provider profile {0} not found")]
    ProfileNotFound(ProfileId),

    /// The instance was not provisioned by this task.
    #[error("instance {instance} does not belong to task {task}")]
    InstanceNotFound { task: TaskId, instance: String },

    /// The task definition failed validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// The engine is shutting down and no longer admits executions.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Provider failure outside the retry loop (connect, subnet resolution).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Notice source failure.
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl GrabError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capgrab::{GrabError, TaskId};
    ///
    /// assert_eq!(GrabError::AlreadyRunning(TaskId(7)).as_label(), "already_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            GrabError::NotFound(_) => "not_found",
            GrabError::AlreadyRunning(_) => "already_running",
            GrabError::TaskIsRunning(_) => "task_is_running",
            GrabError::ProfileNotFound(_) => "profile_not_found",
            GrabError::InstanceNotFound { .. } => "instance_not_found",
            GrabError::InvalidTask(_) => "invalid_task",
            GrabError::ShuttingDown => "shutting_down",
            GrabError::Store(e) => e.as_label(),
            GrabError::Provider(e) => e.kind.as_label(),
            GrabError::Source(_) => "source_unavailable",
        }
    }
}

/// # Errors produced by the engine lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some executors did not observe cancellation in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tasks whose executors were still alive.
        stuck: Vec<TaskId>,
    },

    /// Termination signal handlers could not be installed.
    #[error("cannot listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// Category of a provider failure.
///
/// Adapters map the provider's structured response (status code, service code)
/// into one of these kinds; the executor never inspects message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The provider has no capacity for the requested shape right now.
    OutOfCapacity,
    /// The account is being rate limited.
    Throttled,
    /// The instance never reached the running state within the poll budget.
    Timeout,
    /// The request was rejected as malformed or unsatisfiable.
    InvalidRequest,
    /// Credentials were rejected or lack permission.
    Unauthorized,
    /// Any other failure.
    Other,
}

impl ProviderErrorKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProviderErrorKind::OutOfCapacity => "provider_out_of_capacity",
            ProviderErrorKind::Throttled => "provider_throttled",
            ProviderErrorKind::Timeout => "provider_timeout",
            ProviderErrorKind::InvalidRequest => "provider_invalid_request",
            ProviderErrorKind::Unauthorized => "provider_unauthorized",
            ProviderErrorKind::Other => "provider_other",
        }
    }

    /// Indicates whether a failure of this kind is worth another attempt.
    ///
    /// Returns `true` for [`OutOfCapacity`](Self::OutOfCapacity) and
    /// [`Throttled`](Self::Throttled), `false` otherwise ([`Timeout`](Self::Timeout) included).
    ///
    /// # Example
    /// ```
    /// use capgrab::ProviderErrorKind;
    ///
    /// assert!(ProviderErrorKind::OutOfCapacity.is_retryable());
    /// assert!(!ProviderErrorKind::Timeout.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::OutOfCapacity | ProviderErrorKind::Throttled
        )
    }

    /// Maps a provider error response onto a kind.
    ///
    /// `status` is the HTTP status, `service_code` the provider's error code
    /// (e.g. `TooManyRequests`, `InternalError`, `LimitExceeded`). Some providers
    /// report host capacity exhaustion as `500 InternalError`, so the message is
    /// consulted only for that one code.
    pub fn from_service_code(status: u16, service_code: &str, message: &str) -> Self {
        match (status, service_code) {
            (429, _) | (_, "TooManyRequests") => ProviderErrorKind::Throttled,
            (_, "OutOfCapacity" | "OutOfHostCapacity") => ProviderErrorKind::OutOfCapacity,
            (500, "InternalError")
                if message.to_ascii_lowercase().contains("out of host capacity") =>
            {
                ProviderErrorKind::OutOfCapacity
            }
            (401 | 403, _) | (_, "NotAuthenticated" | "NotAuthorizedOrNotFound") => {
                ProviderErrorKind::Unauthorized
            }
            (400 | 404 | 409, _) | (_, "InvalidParameter" | "LimitExceeded") => {
                ProviderErrorKind::InvalidRequest
            }
            _ => ProviderErrorKind::Other,
        }
    }
}

/// Structured failure reported by a [`ProviderClient`](crate::ProviderClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    /// Failure category; drives retry classification.
    pub kind: ProviderErrorKind,
    /// Provider message, shown in task logs.
    pub message: String,
}

impl ProviderError {
    /// Creates a provider error of the given kind.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ProviderErrorKind::OutOfCapacity`].
    pub fn out_of_capacity(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::OutOfCapacity, message)
    }

    /// Shorthand for [`ProviderErrorKind::Throttled`].
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Throttled, message)
    }

    /// Indicates whether the executor should keep trying after this failure.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// # Errors produced by a [`TaskStore`](crate::TaskStore).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The task the write refers to does not exist.
    #[error("task {0} does not exist")]
    MissingTask(TaskId),

    /// Incrementing would push `current_count` past `target_count`.
    #[error("task {id} already holds its target of {target} instances")]
    CountSaturated {
        /// Task id.
        id: TaskId,
        /// The task's target count.
        target: u32,
    },

    /// Backend failure (I/O, connection, constraint).
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::MissingTask(_) => "store_missing_task",
            StoreError::CountSaturated { .. } => "store_count_saturated",
            StoreError::Backend(_) => "store_backend",
        }
    }
}

/// Failure of the external notice source.
#[derive(Error, Debug)]
#[error("event source unavailable: {0}")]
pub struct SourceError(pub String);

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineConfig`](crate::EngineConfig).
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its accepted range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
