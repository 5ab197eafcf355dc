use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On-disk timestamp layout, e.g. `2024-03-18 08:59:12`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk date layout, also the record file stem.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
}

/// One identity's mark for the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub status: Status,
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
}

/// Everyone marked present on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub records: BTreeMap<String, Entry>,
}

impl AttendanceRecord {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, identity: &str) -> Option<&Entry> {
        self.records.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.records.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mark `identity` present at `when` unless already marked. Returns
    /// whether the record changed.
    pub(crate) fn insert_if_absent(&mut self, identity: &str, when: NaiveDateTime) -> bool {
        if self.records.contains_key(identity) {
            return false;
        }
        self.records.insert(
            identity.to_string(),
            Entry {
                status: Status::Present,
                timestamp: when,
            },
        );
        true
    }
}

mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let mut r = AttendanceRecord::empty(at(0, 0, 0).date());
        assert!(r.insert_if_absent("alice", at(8, 0, 0)));
        assert!(!r.insert_if_absent("alice", at(9, 0, 0)));
        assert_eq!(r.get("alice").unwrap().timestamp, at(8, 0, 0));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_json_layout() {
        let mut r = AttendanceRecord::empty(at(0, 0, 0).date());
        r.insert_if_absent("alice", at(8, 59, 12));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "date": "2024-03-18",
                "records": {
                    "alice": { "status": "Present", "timestamp": "2024-03-18 08:59:12" }
                }
            })
        );
        let back: AttendanceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_rejects_iso_timestamp() {
        let raw = r#"{"date":"2024-03-18","records":{"a":{"status":"Present","timestamp":"2024-03-18T08:00:00"}}}"#;
        assert!(serde_json::from_str::<AttendanceRecord>(raw).is_err());
    }
}
