//! # Reactive trigger.
//!
//! - [`EventSource`] / [`BroadcastSource`] - pub/sub channel of free-text notices
//! - [`StockNotice`] / [`CpuShapeMap`] - notice parsing and CPU-family matching
//! - [`ReactiveTrigger`] / [`NoticeReport`] - starts matching stopped tasks

mod notice;
mod reactive;
mod source;

pub use notice::{CpuShapeMap, StockNotice};
pub use reactive::{NoticeReport, ReactiveTrigger};
pub use source::{BroadcastSource, EventSource};
