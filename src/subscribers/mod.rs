//! # Event subscribers.
//!
//! Events published on the [`Bus`](crate::Bus) are fanned out by a
//! [`SubscriberSet`] to every registered [`Subscribe`] implementation.
//!
//! ```text
//! Registry/Executor/Trigger ── publish ──► Bus ──► engine listener ──► SubscriberSet
//!                                                                        ├──► LogWriter
//!                                                                        └──► custom ...
//! ```
//!
//! [`LogWriter`] (feature `logging`) renders events through `tracing`.

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
