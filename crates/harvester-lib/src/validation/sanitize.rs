//! Sanitization of untyped metric payloads
//!
//! This is the only place a loosely-shaped record is tolerated: the input is
//! an arbitrary JSON value, the output a bounded `MetricsRecord`. Every field
//! is re-checked for type and plausible range; anything failing is dropped
//! rather than clamped.

use crate::models::{
    Epoch, MetricsRecord, Price, Provenance, StorageCapacity, CAPACITY_RANGE, EPOCH_RANGE,
    PERCENTAGE_RANGE, PRICE_RANGE,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Maximum length (in characters) of any string field
pub const MAX_STRING_LEN: usize = 32;

/// Rewrite an untyped payload into a bounded record, or `None` for non-objects
pub fn sanitize(raw: &Value) -> Option<MetricsRecord> {
    let obj = raw.as_object()?;

    Some(MetricsRecord {
        storage_price: obj.get("storagePrice").and_then(sanitize_price),
        write_price: obj.get("writePrice").and_then(sanitize_price),
        storage_capacity: obj.get("storageCapacity").and_then(sanitize_capacity),
        epoch: obj.get("epoch").and_then(sanitize_epoch),
        provenance: obj
            .get("provenance")
            .and_then(Value::as_str)
            .map(Provenance::normalize)
            .unwrap_or(Provenance::Unknown),
        observed_at: obj
            .get("observedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

/// Sanitize an already-typed record by round-tripping it through its wire shape
pub fn sanitize_record(record: &MetricsRecord) -> Option<MetricsRecord> {
    serde_json::to_value(record)
        .ok()
        .and_then(|value| sanitize(&value))
}

fn sanitize_price(value: &Value) -> Option<Price> {
    let obj = value.as_object()?;
    let amount = integer_in(
        obj,
        "value",
        i64::from(*PRICE_RANGE.start()),
        i64::from(*PRICE_RANGE.end()),
    )?;
    let unit = obj.get("unit")?.as_str()?;

    Some(Price {
        value: u32::try_from(amount).ok()?,
        unit: truncate(unit),
    })
}

fn sanitize_capacity(value: &Value) -> Option<StorageCapacity> {
    let obj = value.as_object()?;
    let percentage = obj
        .get("percentage")?
        .as_f64()
        .filter(|p| PERCENTAGE_RANGE.contains(p))?;

    let bound = |key: &str| {
        integer_in(obj, key, 0, *CAPACITY_RANGE.end() as i64).and_then(|v| u64::try_from(v).ok())
    };

    Some(StorageCapacity {
        used: bound("used"),
        total: bound("total"),
        percentage,
    })
}

fn sanitize_epoch(value: &Value) -> Option<Epoch> {
    let obj = value.as_object()?;
    let number = integer_in(
        obj,
        "number",
        i64::from(*EPOCH_RANGE.start()),
        i64::from(*EPOCH_RANGE.end()),
    )?;

    Some(Epoch {
        number: u32::try_from(number).ok()?,
    })
}

/// An integral field within `[min, max]`. Floats are accepted only when whole.
fn integer_in(obj: &Map<String, Value>, key: &str, min: i64, max: i64) -> Option<i64> {
    let value = obj.get(key)?;
    let n = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })?;

    (min..=max).contains(&n).then_some(n)
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_STRING_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_record() -> Value {
        json!({
            "storagePrice": { "value": 11000, "unit": "FROST/MB" },
            "writePrice": { "value": 20000, "unit": "FROST/MB" },
            "storageCapacity": { "used": 644, "total": 4167, "percentage": 15.45 },
            "epoch": { "number": 150 },
            "provenance": "realtime",
            "observedAt": "2026-10-19T00:00:03Z"
        })
    }

    #[test]
    fn test_sanitize_valid_record() {
        let record = sanitize(&raw_record()).unwrap();

        assert_eq!(record.storage_price, Some(Price::new(11_000, "FROST/MB")));
        assert_eq!(record.write_price.unwrap().value, 20_000);
        assert_eq!(record.storage_capacity.unwrap().total, Some(4167));
        assert_eq!(record.epoch, Some(Epoch { number: 150 }));
        assert_eq!(record.provenance, Provenance::Realtime);
        assert_eq!(record.observed_at.to_rfc3339(), "2026-10-19T00:00:03+00:00");
    }

    #[test]
    fn test_sanitize_rejects_non_objects() {
        assert!(sanitize(&json!(null)).is_none());
        assert!(sanitize(&json!([1, 2, 3])).is_none());
        assert!(sanitize(&json!("storagePrice")).is_none());
        assert!(sanitize(&json!(42)).is_none());
    }

    #[test]
    fn test_out_of_range_fields_are_dropped_not_clamped() {
        let mut raw = raw_record();
        raw["storagePrice"]["value"] = json!(999);
        raw["writePrice"]["value"] = json!(100_001);
        raw["storageCapacity"]["percentage"] = json!(100.5);
        raw["epoch"]["number"] = json!(0);

        let record = sanitize(&raw).unwrap();

        assert!(record.storage_price.is_none());
        assert!(record.write_price.is_none());
        assert!(record.storage_capacity.is_none());
        assert!(record.epoch.is_none());
    }

    #[test]
    fn test_wrong_types_are_dropped() {
        let mut raw = raw_record();
        raw["storagePrice"]["value"] = json!("11000");
        raw["writePrice"]["unit"] = json!(7);
        raw["epoch"] = json!(150);
        raw["storageCapacity"]["used"] = json!(-3);

        let record = sanitize(&raw).unwrap();

        assert!(record.storage_price.is_none());
        assert!(record.write_price.is_none());
        assert!(record.epoch.is_none());
        let capacity = record.storage_capacity.unwrap();
        assert!(capacity.used.is_none());
        assert_eq!(capacity.total, Some(4167));
    }

    #[test]
    fn test_whole_floats_accepted_fractional_rejected() {
        let mut raw = raw_record();
        raw["storagePrice"]["value"] = json!(11000.0);
        raw["writePrice"]["value"] = json!(20000.5);

        let record = sanitize(&raw).unwrap();
        assert_eq!(record.storage_price.unwrap().value, 11_000);
        assert!(record.write_price.is_none());
    }

    #[test]
    fn test_strings_truncated() {
        let mut raw = raw_record();
        raw["storagePrice"]["unit"] = json!("F".repeat(100));

        let record = sanitize(&raw).unwrap();
        assert_eq!(record.storage_price.unwrap().unit.len(), MAX_STRING_LEN);
    }

    #[test]
    fn test_provenance_and_timestamp_normalized() {
        let mut raw = raw_record();
        raw["provenance"] = json!("scraped");
        raw["observedAt"] = json!("yesterday");

        let before = Utc::now();
        let record = sanitize(&raw).unwrap();

        assert_eq!(record.provenance, Provenance::Unknown);
        assert!(record.observed_at >= before);
    }

    #[test]
    fn test_missing_provenance_is_unknown() {
        let record = sanitize(&json!({})).unwrap();
        assert_eq!(record.provenance, Provenance::Unknown);
        assert_eq!(record.populated_fields(), 0);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let mut raw = raw_record();
        raw["storagePrice"]["unit"] = json!("FROST/MB with a very long trailing description");
        raw["writePrice"]["value"] = json!(5);
        raw["provenance"] = json!("bogus");
        raw["observedAt"] = json!(17);

        let once = sanitize(&raw).unwrap();
        let twice = sanitize_record(&once).unwrap();

        assert_eq!(once, twice);
    }
}
