//! Groups raw samples by PEG name into per-window aggregates, and captures
//! the record-level identifiers (`ne_key`, `host_name`, derived `cell_id`)
//! from the first non-empty row *before* the groupwise reduction throws them
//! away — the critical invariant this component exists to protect.

use std::collections::BTreeMap;

use crate::models::{AggregatedPeg, PartialIdentifiers, RawSample, WindowTag};

pub fn aggregate(raw: &[RawSample], tag: WindowTag) -> (Vec<AggregatedPeg>, PartialIdentifiers) {
    let identifiers = extract_identifiers(raw);

    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in raw {
        groups.entry(row.peg_name.as_str()).or_default().push(row.value);
    }

    let aggregated = groups
        .into_iter()
        .map(|(peg_name, values)| {
            let count = values.len() as u64;
            let avg = mean(&values);
            let rsd = if count >= 2 && avg != 0.0 { 100.0 * stdev(&values, avg) / avg } else { 0.0 };
            AggregatedPeg { peg_name: peg_name.to_string(), window_tag: tag, avg, count, rsd }
        })
        .collect();

    (aggregated, identifiers)
}

fn extract_identifiers(raw: &[RawSample]) -> PartialIdentifiers {
    let first = raw.iter().find(|r| {
        r.ne_key.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
            || r.host_name.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
            || r.index_name.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    });

    match first {
        Some(row) => PartialIdentifiers {
            ne_id: row.ne_key.clone().filter(|s| !s.is_empty()),
            sw_name: row.host_name.clone().filter(|s| !s.is_empty()),
            cell_id: row.index_name.as_deref().and_then(derive_cell_id),
        },
        None => PartialIdentifiers::default(),
    }
}

/// Derives a cell id from the trailing digit run of `index_name`, split on
/// `_`: `"PEG_420_2010"` -> `"2010"`. If the last segment is not all digits
/// and the penultimate one is, falls back to the penultimate segment;
/// otherwise returns `None`.
fn derive_cell_id(index_name: &str) -> Option<String> {
    let segments: Vec<&str> = index_name.split('_').collect();
    let last = segments.last()?;
    if is_all_digits(last) {
        return Some(last.to_string());
    }
    if segments.len() >= 2 {
        let penultimate = segments[segments.len() - 2];
        if is_all_digits(penultimate) {
            return Some(penultimate.to_string());
        }
    }
    None
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64], avg: f64) -> f64 {
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn sample(peg: &str, value: f64, ne: &str, host: &str, index: &str) -> RawSample {
        RawSample {
            timestamp: FixedOffset::east_opt(0).unwrap().timestamp_opt(0, 0).unwrap(),
            peg_name: peg.to_string(),
            value,
            ne_key: Some(ne.to_string()),
            host_name: Some(host.to_string()),
            index_name: Some(index.to_string()),
        }
    }

    #[test]
    fn groups_by_peg_name_and_computes_avg_count() {
        let rows = vec![
            sample("A", 10.0, "nvgnb#1", "host1", "PEG_420_2010"),
            sample("A", 20.0, "nvgnb#1", "host1", "PEG_420_2010"),
            sample("B", 5.0, "nvgnb#1", "host1", "PEG_420_2010"),
        ];
        let (aggregated, _) = aggregate(&rows, WindowTag::N);
        let a = aggregated.iter().find(|p| p.peg_name == "A").unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(a.avg, 15.0);
        let b = aggregated.iter().find(|p| p.peg_name == "B").unwrap();
        assert_eq!(b.count, 1);
        assert_eq!(b.rsd, 0.0);
    }

    #[test]
    fn identifiers_come_from_first_non_empty_row() {
        let rows = vec![sample("A", 1.0, "nvgnb#1", "host1", "PEG_420_2010")];
        let (_, identifiers) = aggregate(&rows, WindowTag::N);
        assert_eq!(identifiers.ne_id.as_deref(), Some("nvgnb#1"));
        assert_eq!(identifiers.sw_name.as_deref(), Some("host1"));
        assert_eq!(identifiers.cell_id.as_deref(), Some("2010"));
    }

    #[test]
    fn cell_id_falls_back_to_penultimate_segment() {
        assert_eq!(derive_cell_id("PEG_2010_abc"), Some("2010".to_string()));
    }

    #[test]
    fn cell_id_absent_when_neither_segment_is_numeric() {
        assert_eq!(derive_cell_id("PEG_abc_def"), None);
    }

    #[test]
    fn empty_input_yields_no_groups_and_no_identifiers() {
        let (aggregated, identifiers) = aggregate(&[], WindowTag::N);
        assert!(aggregated.is_empty());
        assert!(identifiers.ne_id.is_none());
    }
}
