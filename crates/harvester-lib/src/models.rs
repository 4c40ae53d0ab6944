//! Core data models for the metrics harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Plausible range for storage and write prices
pub const PRICE_RANGE: RangeInclusive<u32> = 1_000..=100_000;

/// Plausible range for the capacity usage percentage
pub const PERCENTAGE_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Plausible range for the epoch ordinal
pub const EPOCH_RANGE: RangeInclusive<u32> = 1..=10_000;

/// Plausible range for used/total capacity figures (TB)
pub const CAPACITY_RANGE: RangeInclusive<u64> = 0..=1_000_000;

/// Default unit attached to extracted prices
pub const PRICE_UNIT: &str = "FROST/MB";

/// How the values of a record were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Realtime,
    Fallback,
    Estimated,
    Cached,
    Unknown,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Realtime => "realtime",
            Provenance::Fallback => "fallback",
            Provenance::Estimated => "estimated",
            Provenance::Cached => "cached",
            Provenance::Unknown => "unknown",
        }
    }

    /// Parse a provenance tag, mapping anything unrecognized to `Unknown`
    pub fn normalize(tag: &str) -> Self {
        match tag {
            "realtime" => Provenance::Realtime,
            "fallback" => Provenance::Fallback,
            "estimated" => Provenance::Estimated,
            "cached" => Provenance::Cached,
            _ => Provenance::Unknown,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A price with its unit, e.g. `11000 FROST/MB`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub value: u32,
    pub unit: String,
}

impl Price {
    pub fn new(value: u32, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Network storage capacity usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCapacity {
    pub used: Option<u64>,
    pub total: Option<u64>,
    pub percentage: f64,
}

impl StorageCapacity {
    /// Build a capacity from a `used / total` ratio, percentage rounded to
    /// two decimals
    pub fn from_ratio(used: u64, total: u64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let percentage = (used as f64 / total as f64 * 10_000.0).round() / 100.0;
        Some(Self {
            used: Some(used),
            total: Some(total),
            percentage,
        })
    }

    pub fn from_percentage(percentage: f64) -> Self {
        Self {
            used: None,
            total: None,
            percentage,
        }
    }
}

/// Current network epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub number: u32,
}

/// The unit of value moved through the refresh pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    pub storage_price: Option<Price>,
    pub write_price: Option<Price>,
    pub storage_capacity: Option<StorageCapacity>,
    pub epoch: Option<Epoch>,
    pub provenance: Provenance,
    pub observed_at: DateTime<Utc>,
}

impl MetricsRecord {
    /// An empty record with every field absent
    pub fn empty(provenance: Provenance) -> Self {
        Self {
            storage_price: None,
            write_price: None,
            storage_capacity: None,
            epoch: None,
            provenance,
            observed_at: Utc::now(),
        }
    }

    /// Number of the four metric fields that are present
    pub fn populated_fields(&self) -> usize {
        [
            self.storage_price.is_some(),
            self.write_price.is_some(),
            self.storage_capacity.is_some(),
            self.epoch.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}
