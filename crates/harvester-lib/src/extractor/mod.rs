//! Metrics extraction from rendered page content
//!
//! Extraction runs two strategies, first match wins per field:
//! 1. A full-document text scan for price/unit pairs, `used / total TB`
//!    ratios, labelled percentages and the epoch ordinal.
//! 2. A structural scan over discrete text nodes, anchored to nearby labels,
//!    for whatever the first pass left unset.
//!
//! When a capacity figure was found but no price at all, the documented
//! fallback prices are substituted and the record is tagged `fallback`.
//! Extraction never fails; an exhausted page yields an all-absent record.

mod text;

pub use text::{document_text, text_nodes};

use crate::models::{Epoch, MetricsRecord, Price, Provenance, StorageCapacity, PRICE_UNIT};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Storage price substituted when only capacity could be extracted
pub const FALLBACK_STORAGE_PRICE: u32 = 11_000;

/// Write price substituted when only capacity could be extracted
pub const FALLBACK_WRITE_PRICE: u32 = 20_000;

/// How many text nodes after a label the structural scan looks at
const LABEL_LOOKAHEAD: usize = 3;

const NUMBER: &str = r"(\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?";

struct Patterns {
    price: Regex,
    ratio: Regex,
    labelled_percentage: Regex,
    epoch: Regex,
    bare_number: Regex,
    bare_ratio: Regex,
    price_unit: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: String| Regex::new(&pattern).expect("invalid extractor pattern");
        Patterns {
            price: compile(format!(r"(?i){NUMBER}\s*FROST\s*/\s*([KMGT]i?B)\b")),
            ratio: compile(format!(r"(?i){NUMBER}\s*(?:TB)?\s*/\s*{NUMBER}\s*TB\b")),
            labelled_percentage: compile(
                r"(?i)(?:capacity|used|usage)[^\d%]{0,40}?(\d{1,3}(?:\.\d+)?)\s*%".to_string(),
            ),
            epoch: compile(r"(?i)\bepoch\s*[:#]?\s*(\d{1,3}(?:,\d{3})+|\d+)\b".to_string()),
            bare_number: compile(NUMBER.to_string()),
            bare_ratio: compile(format!(r"{NUMBER}\s*/\s*{NUMBER}")),
            price_unit: compile(r"(?i)FROST\s*/\s*([KMGT]i?B)\b".to_string()),
        }
    })
}

/// Extract a best-effort metrics record from raw page content
pub fn extract(raw_content: &str) -> MetricsRecord {
    let nodes = text_nodes(raw_content);
    let document = document_text(&nodes);

    let mut record = MetricsRecord::empty(Provenance::Realtime);
    scan_document(&document, &mut record);
    scan_nodes(&nodes, &mut record);

    if record.storage_capacity.is_some()
        && record.storage_price.is_none()
        && record.write_price.is_none()
    {
        debug!("Capacity found without prices, substituting fallback prices");
        record.storage_price = Some(Price::new(FALLBACK_STORAGE_PRICE, PRICE_UNIT));
        record.write_price = Some(Price::new(FALLBACK_WRITE_PRICE, PRICE_UNIT));
        record.provenance = Provenance::Fallback;
    }

    debug!(
        fields = record.populated_fields(),
        provenance = %record.provenance,
        nodes = nodes.len(),
        "Extraction finished"
    );

    record
}

/// Primary strategy: pattern scan over the whole document text
fn scan_document(document: &str, record: &mut MetricsRecord) {
    let p = patterns();

    // Positional: first price match is storage, second is write.
    let mut prices = p.price.captures_iter(document).map(|caps| {
        let value = parse_u32(&caps[1]);
        let unit = format!("FROST/{}", &caps[2]);
        value.map(|v| Price::new(v, unit))
    });
    record.storage_price = prices.next().flatten();
    record.write_price = prices.next().flatten();

    record.storage_capacity = p
        .ratio
        .captures(document)
        .and_then(|caps| StorageCapacity::from_ratio(parse_u64(&caps[1])?, parse_u64(&caps[2])?))
        .or_else(|| {
            p.labelled_percentage
                .captures(document)
                .and_then(|caps| caps[1].parse::<f64>().ok())
                .map(StorageCapacity::from_percentage)
        });

    record.epoch = p
        .epoch
        .captures(document)
        .and_then(|caps| parse_u32(&caps[1]))
        .map(|number| Epoch { number });
}

/// Secondary strategy: label-anchored scan over individual text nodes
fn scan_nodes(nodes: &[String], record: &mut MetricsRecord) {
    let p = patterns();

    for (i, node) in nodes.iter().enumerate() {
        let lower = node.to_lowercase();

        if record.storage_price.is_none() {
            if let Some(at) = label_end(&lower, &["storage price", "storage cost"]) {
                record.storage_price = price_near(nodes, i, at);
            }
        }

        if record.write_price.is_none() {
            if let Some(at) = label_end(&lower, &["write price", "write cost"]) {
                record.write_price = price_near(nodes, i, at);
            }
        }

        if record.storage_capacity.is_none() {
            if let Some(at) = label_end(&lower, &["capacity"]) {
                record.storage_capacity = window(nodes, i, at).find_map(|text| {
                    let caps = p.bare_ratio.captures(text)?;
                    StorageCapacity::from_ratio(parse_u64(&caps[1])?, parse_u64(&caps[2])?)
                });
            }
        }

        if record.epoch.is_none() {
            if let Some(at) = label_end(&lower, &["epoch"]) {
                record.epoch = window(nodes, i, at)
                    .find_map(|text| parse_u32(&p.bare_number.captures(text)?[1]))
                    .map(|number| Epoch { number });
            }
        }
    }
}

/// Byte offset just past the first matching label in a lowercased node
fn label_end(lower: &str, labels: &[&str]) -> Option<usize> {
    labels
        .iter()
        .find_map(|label| lower.find(label).map(|start| start + label.len()))
}

/// The remainder of the label node followed by the next few nodes
fn window<'a>(
    nodes: &'a [String],
    index: usize,
    label_end: usize,
) -> impl Iterator<Item = &'a str> {
    let head = nodes[index].get(label_end..).unwrap_or("");
    std::iter::once(head).chain(
        nodes[index + 1..]
            .iter()
            .take(LABEL_LOOKAHEAD)
            .map(String::as_str),
    )
}

fn price_near(nodes: &[String], index: usize, label_end: usize) -> Option<Price> {
    let p = patterns();
    let value = window(nodes, index, label_end)
        .find_map(|text| parse_u32(&p.bare_number.captures(text)?[1]))?;
    let unit = window(nodes, index, label_end)
        .find_map(|text| p.price_unit.captures(text).map(|caps| format!("FROST/{}", &caps[1])))
        .unwrap_or_else(|| PRICE_UNIT.to_string());
    Some(Price::new(value, unit))
}

fn parse_u32(digits: &str) -> Option<u32> {
    digits.replace(',', "").parse().ok()
}

fn parse_u64(digits: &str) -> Option<u64> {
    digits.replace(',', "").parse().ok()
}
