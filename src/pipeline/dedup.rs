//! Record deduplication
//!
//! Collapses records that describe the same real-world entity down to one:
//! - Grouping is by a caller-supplied identity key
//! - Within a group the most recent entry wins
//! - Ties keep the entry seen first
//!
//! Cross-feed collapse (the same activator spotted on both SOTA and POTA)
//! works because adapters build a normalized identity with the key helpers
//! below instead of using feed-assigned IDs.

use crate::types::Record;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::OnceLock;

/// Width of the time bucket used by [`quake_key`] (seconds).
const QUAKE_TIME_BUCKET_SECS: i64 = 600;

/// Keep one entry per identity, preferring the maximal `recency`.
///
/// Output order follows the first appearance of each identity in the input.
pub fn dedupe<T, K, R, FI, FR>(records: Vec<T>, identity: FI, recency: FR) -> Vec<T>
where
    K: Eq + Hash,
    R: PartialOrd,
    FI: Fn(&T) -> K,
    FR: Fn(&T) -> R,
{
    let mut slots: Vec<T> = Vec::with_capacity(records.len());
    let mut index: HashMap<K, usize> = HashMap::with_capacity(records.len());

    for record in records {
        let key = identity(&record);
        match index.get(&key) {
            Some(&slot) => {
                // Strictly newer only: equal recency keeps the first-seen entry.
                if recency(&record) > recency(&slots[slot]) {
                    slots[slot] = record;
                }
            }
            None => {
                index.insert(key, slots.len());
                slots.push(record);
            }
        }
    }

    slots
}

/// Dedupe normalized records on `identity`, newest `timestamp` wins.
pub fn dedupe_records(records: Vec<Record>) -> Vec<Record> {
    dedupe(records, |r| r.identity.clone(), |r| r.timestamp)
}

fn portable_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"/(P|M|MM|AM|QRP|R)$").unwrap()
    })
}

/// Normalized operator identity: uppercase, no whitespace, no portable suffix.
///
/// `"k6abc/p"`, `" K6ABC "` and `"K6ABC/QRP"` all map to `"K6ABC"`.
pub fn callsign_key(callsign: &str) -> String {
    let upper: String = callsign
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    portable_suffix().replace(&upper, "").into_owned()
}

/// Composite quake identity: location to 0.1°, magnitude to 0.1 and a
/// 10-minute time bucket.
///
/// Two catalogue revisions of the same event (slightly moved epicentre,
/// updated magnitude) usually share this key.
pub fn quake_key(lat: f64, lon: f64, magnitude: f64, time: DateTime<Utc>) -> String {
    let bucket = time.timestamp().div_euclid(QUAKE_TIME_BUCKET_SECS);
    format!("{lat:.1}:{lon:.1}:M{magnitude:.1}:{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Source};
    use chrono::TimeZone;

    fn rec(id: &str, t: i64) -> Record {
        Record::new(
            id,
            Source::Pota,
            Category::Hf,
            Utc.timestamp_opt(t, 0).unwrap(),
        )
    }

    #[test]
    fn keeps_most_recent_per_identity() {
        let out = dedupe_records(vec![rec("A", 1), rec("A", 2), rec("B", 1)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].identity, "A");
        assert_eq!(out[0].timestamp.timestamp(), 2);
        assert_eq!(out[1].identity, "B");
        assert_eq!(out[1].timestamp.timestamp(), 1);
    }

    #[test]
    fn newer_entry_seen_first_is_kept() {
        let out = dedupe_records(vec![rec("A", 5), rec("A", 3)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp.timestamp(), 5);
    }

    #[test]
    fn ties_keep_first_seen() {
        let first = rec("A", 7).with_field("n", "first");
        let second = rec("A", 7).with_field("n", "second");
        let out = dedupe_records(vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].field("n"), "first");
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![rec("A", 1), rec("B", 4), rec("A", 9), rec("C", 2), rec("B", 3)];
        let once = dedupe_records(input);
        let twice = dedupe_records(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input() {
        assert!(dedupe_records(Vec::new()).is_empty());
    }

    #[test]
    fn generic_dedupe_on_tuples() {
        let out = dedupe(vec![("x", 1), ("y", 2), ("x", 3)], |t| t.0, |t| t.1);
        assert_eq!(out, vec![("x", 3), ("y", 2)]);
    }

    #[test]
    fn callsign_normalization() {
        assert_eq!(callsign_key("k6abc/p"), "K6ABC");
        assert_eq!(callsign_key(" K6ABC "), "K6ABC");
        assert_eq!(callsign_key("K6ABC/QRP"), "K6ABC");
        assert_eq!(callsign_key("VE7/K6ABC"), "VE7/K6ABC");
    }

    #[test]
    fn cross_feed_spots_collapse() {
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let sota = Record::new(callsign_key("w6xyz/p"), Source::Sota, Category::Vhf, at(100));
        let pota = Record::new(callsign_key("W6XYZ"), Source::Pota, Category::Hf, at(200));
        let out = dedupe_records(vec![sota, pota]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, Source::Pota);
    }

    #[test]
    fn quake_key_buckets_revisions() {
        let t1 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_030, 0).unwrap();
        assert_eq!(
            quake_key(37.312, -121.701, 3.31, t1),
            quake_key(37.308, -121.698, 3.29, t2)
        );
        assert_ne!(
            quake_key(37.3, -121.7, 3.3, t1),
            quake_key(37.3, -121.7, 4.1, t1)
        );
    }
}
