//! # Stock notices and CPU-family matching.
//!
//! A stock notice is free text published by an external monitor when capacity
//! may be available. Two labelled fields are extracted:
//!
//! ```text
//! 开机地区：ap-tokyo-1        (or "Region: ap-tokyo-1")
//! CPU类型：ARM               (or "CPU type: ARM", optional)
//! ```
//!
//! Labels are case-insensitive and accept both `:` and the full-width `：`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:region|开机地区)\s*[:：]\s*([A-Za-z0-9-]+)")
        .expect("hardcoded regex pattern is valid")
});

static CPU_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:cpu\s*type|CPU类型)\s*[:：]\s*([A-Za-z0-9_]+)")
        .expect("hardcoded regex pattern is valid")
});

/// Parsed availability notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockNotice {
    /// Lowercased region identifier.
    pub region: String,
    /// CPU family as written in the notice; `None` matches every shape.
    pub cpu: Option<String>,
}

impl StockNotice {
    /// Extracts region and CPU family. Returns `None` when no region is present.
    ///
    /// ## Example
    /// ```rust
    /// use capgrab::StockNotice;
    ///
    /// let notice = StockNotice::parse("补货通知\n开机地区：AP-Tokyo-1\nCPU类型：ARM").unwrap();
    /// assert_eq!(notice.region, "ap-tokyo-1");
    /// assert_eq!(notice.cpu.as_deref(), Some("ARM"));
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let region = REGION_RE
            .captures(text)
            .and_then(|c| c.get(1))?
            .as_str()
            .to_ascii_lowercase();
        let cpu = CPU_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Some(Self { region, cpu })
    }

    /// `true` when `region` names the same region (case-insensitive).
    pub fn is_region(&self, region: &str) -> bool {
        self.region.eq_ignore_ascii_case(region.trim())
    }
}

impl fmt::Display for StockNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region={} cpu={}",
            self.region,
            self.cpu.as_deref().unwrap_or("any")
        )
    }
}

/// CPU family to instance shape, e.g. `ARM → VM.Standard.A1.Flex`.
///
/// Family names are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuShapeMap(BTreeMap<String, String>);

impl Default for CpuShapeMap {
    fn default() -> Self {
        Self::from_pairs([("ARM", "VM.Standard.A1.Flex"), ("AMD", "VM.Standard.E2.1.Micro")])
    }
}

impl CpuShapeMap {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(cpu, shape)| (cpu.to_string(), shape.to_string()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shape mapped to `cpu`, if the family is known.
    pub fn shape_for(&self, cpu: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(family, _)| family.eq_ignore_ascii_case(cpu))
            .map(|(_, shape)| shape.as_str())
    }

    /// `true` when a task of `shape` should react to a notice for `cpu`.
    ///
    /// No CPU matches every shape; an unknown family matches none.
    pub fn matches(&self, shape: &str, cpu: Option<&str>) -> bool {
        match cpu {
            None => true,
            Some(cpu) => self.shape_for(cpu) == Some(shape),
        }
    }
}
