//! Records: JSON object rows exchanged between the cache and the store.

use serde_json::{Map, Value};

/// A single row: a JSON object keyed by column name.
pub type Record = Map<String, Value>;

/// Name of the primary key field carried by every synced record.
pub const RECORD_ID_FIELD: &str = "id";

/// Extract a record's primary key as a string.
///
/// String ids are returned verbatim; numeric ids use their decimal form so
/// `{"id": 7}` and `{"id": "7"}` address the same row.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(RECORD_ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Simple equality match: every predicate field must be present in the
/// record with an equal value. An empty predicate matches everything.
pub fn matches_predicate(predicate: &Record, record: &Record) -> bool {
    predicate
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn record_id_reads_string_and_number() {
        assert_eq!(record_id(&obj(json!({"id": "t1"}))), Some("t1".into()));
        assert_eq!(record_id(&obj(json!({"id": 7}))), Some("7".into()));
        assert_eq!(record_id(&obj(json!({"id": null}))), None);
        assert_eq!(record_id(&obj(json!({"title": "A"}))), None);
    }

    #[test]
    fn empty_predicate_matches_everything() {
        assert!(matches_predicate(&Record::new(), &obj(json!({"id": "x"}))));
    }

    #[test]
    fn predicate_requires_equal_values() {
        let record = obj(json!({"id": "t1", "status": "open", "priority": 3}));
        assert!(matches_predicate(&obj(json!({"status": "open"})), &record));
        assert!(matches_predicate(
            &obj(json!({"status": "open", "priority": 3})),
            &record
        ));
        assert!(!matches_predicate(&obj(json!({"status": "done"})), &record));
        assert!(!matches_predicate(&obj(json!({"owner": "me"})), &record));
    }
}
