//! Record validation and sanitization
//!
//! Two independent gates over the same record:
//! - `is_servable` (loose): good enough to hand to a caller
//! - `is_cacheable` (strict): good enough to store for a full TTL
//!
//! Every record accepted by the strict gate is also accepted by the loose one.

mod sanitize;

pub use sanitize::{sanitize, sanitize_record, MAX_STRING_LEN};

use crate::models::{
    MetricsRecord, Price, Provenance, StorageCapacity, CAPACITY_RANGE, EPOCH_RANGE,
    PERCENTAGE_RANGE, PRICE_RANGE,
};

/// Matches required by the loose gate for `realtime` records
pub const REALTIME_SERVE_THRESHOLD: usize = 2;

/// Matches required by the loose gate for any other provenance
pub const DEFAULT_SERVE_THRESHOLD: usize = 3;

/// Loose check: is the record good enough to return to a caller?
pub fn is_servable(record: &MetricsRecord) -> bool {
    let matches = [
        record.storage_price.as_ref().is_some_and(|p| p.value > 0),
        record.write_price.as_ref().is_some_and(|p| p.value > 0),
        record.storage_capacity.is_some(),
        record.epoch.as_ref().is_some_and(|e| e.number > 0),
    ]
    .into_iter()
    .filter(|m| *m)
    .count();

    let threshold = match record.provenance {
        Provenance::Realtime => REALTIME_SERVE_THRESHOLD,
        _ => DEFAULT_SERVE_THRESHOLD,
    };

    matches >= threshold
}

/// Strict check: all four fields present and within plausible ranges
pub fn is_cacheable(record: &MetricsRecord) -> bool {
    rejection_reason(record).is_none()
}

/// The first reason the strict gate rejects a record, if any
pub fn rejection_reason(record: &MetricsRecord) -> Option<&'static str> {
    if !price_in_range(record.storage_price.as_ref()) {
        return Some("storage price missing or out of range");
    }
    if !price_in_range(record.write_price.as_ref()) {
        return Some("write price missing or out of range");
    }
    if !capacity_in_range(record.storage_capacity.as_ref()) {
        return Some("storage capacity missing or out of range");
    }
    if !record
        .epoch
        .as_ref()
        .is_some_and(|e| EPOCH_RANGE.contains(&e.number))
    {
        return Some("epoch missing or out of range");
    }
    None
}

fn price_in_range(price: Option<&Price>) -> bool {
    price.is_some_and(|p| PRICE_RANGE.contains(&p.value))
}

fn capacity_in_range(capacity: Option<&StorageCapacity>) -> bool {
    capacity.is_some_and(|c| {
        PERCENTAGE_RANGE.contains(&c.percentage)
            && c.used.map_or(true, |u| CAPACITY_RANGE.contains(&u))
            && c.total.map_or(true, |t| CAPACITY_RANGE.contains(&t))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Epoch, PRICE_UNIT};

    fn complete_record(provenance: Provenance) -> MetricsRecord {
        let mut record = MetricsRecord::empty(provenance);
        record.storage_price = Some(Price::new(11_000, PRICE_UNIT));
        record.write_price = Some(Price::new(20_000, PRICE_UNIT));
        record.storage_capacity = StorageCapacity::from_ratio(644, 4167);
        record.epoch = Some(Epoch { number: 150 });
        record
    }

    #[test]
    fn test_complete_record_passes_both_gates() {
        let record = complete_record(Provenance::Realtime);
        assert!(is_cacheable(&record));
        assert!(is_servable(&record));
        assert_eq!(rejection_reason(&record), None);
    }

    #[test]
    fn test_realtime_needs_two_matches() {
        let mut record = MetricsRecord::empty(Provenance::Realtime);
        record.epoch = Some(Epoch { number: 150 });
        assert!(!is_servable(&record));

        record.storage_capacity = Some(StorageCapacity::from_percentage(12.0));
        assert!(is_servable(&record));
        assert!(!is_cacheable(&record));
    }

    #[test]
    fn test_other_provenance_needs_three_matches() {
        let mut record = complete_record(Provenance::Fallback);
        record.epoch = None;
        assert!(is_servable(&record));

        record.write_price = None;
        assert!(!is_servable(&record));

        record.provenance = Provenance::Realtime;
        assert!(is_servable(&record));
    }

    #[test]
    fn test_strict_rejects_out_of_range_values() {
        let mut record = complete_record(Provenance::Realtime);
        record.write_price = Some(Price::new(500, PRICE_UNIT));
        assert_eq!(
            rejection_reason(&record),
            Some("write price missing or out of range")
        );
        // Still servable: three of four values are usable
        assert!(is_servable(&record));

        let mut record = complete_record(Provenance::Realtime);
        record.epoch = Some(Epoch { number: 10_001 });
        assert!(!is_cacheable(&record));

        let mut record = complete_record(Provenance::Realtime);
        record.storage_capacity = Some(StorageCapacity::from_percentage(f64::NAN));
        assert!(!is_cacheable(&record));
    }

    #[test]
    fn test_strict_implies_loose() {
        let provenances = [
            Provenance::Realtime,
            Provenance::Fallback,
            Provenance::Estimated,
            Provenance::Cached,
            Provenance::Unknown,
        ];

        for provenance in provenances {
            for mask in 0u8..16 {
                let mut record = complete_record(provenance);
                if mask & 1 != 0 {
                    record.storage_price = None;
                }
                if mask & 2 != 0 {
                    record.write_price = None;
                }
                if mask & 4 != 0 {
                    record.storage_capacity = None;
                }
                if mask & 8 != 0 {
                    record.epoch = None;
                }

                if is_cacheable(&record) {
                    assert!(is_servable(&record), "{provenance} mask {mask}");
                }
            }
        }
    }

    #[test]
    fn test_sanitized_fallback_record_is_servable() {
        let record = crate::extractor::extract("Capacity: 644 / 4,167 TB, Epoch 150");
        let sanitized = sanitize_record(&record).unwrap();

        assert_eq!(sanitized.provenance, Provenance::Fallback);
        assert!(is_cacheable(&sanitized));
        assert!(is_servable(&sanitized));
    }
}
