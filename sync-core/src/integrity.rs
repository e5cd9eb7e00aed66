//! Referential integrity checks for writes.
//!
//! Before a write leaves the client, every configured foreign key on the
//! record must point at a parent that exists. Existence is answered by the
//! caller (usually the local cache) so this stays free of I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_types::Record;
use thiserror::Error;

/// A column that references another table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column on the child record.
    pub field: String,
    /// Table holding the referenced row.
    pub parent_table: String,
}

impl ForeignKey {
    /// Create a foreign key.
    pub fn new(field: impl Into<String>, parent_table: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            parent_table: parent_table.into(),
        }
    }
}

/// Integrity violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// A foreign key points at a row that does not exist.
    #[error("{table}.{field} references missing {parent_table} row {parent_id}")]
    MissingParent {
        /// Child table.
        table: String,
        /// Foreign key column.
        field: String,
        /// Referenced table.
        parent_table: String,
        /// Referenced id.
        parent_id: String,
    },
}

/// Check every foreign key of `record`.
///
/// Missing and null references are allowed. `parent_exists(table, id)` must
/// answer whether the referenced row exists.
pub fn check_references<F>(
    table: &str,
    record: &Record,
    foreign_keys: &[ForeignKey],
    parent_exists: F,
) -> Result<(), IntegrityError>
where
    F: Fn(&str, &str) -> bool,
{
    for fk in foreign_keys {
        let parent_id = match record.get(&fk.field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        if !parent_exists(&fk.parent_table, &parent_id) {
            return Err(IntegrityError::MissingParent {
                table: table.to_string(),
                field: fk.field.clone(),
                parent_table: fk.parent_table.clone(),
                parent_id,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn fks() -> Vec<ForeignKey> {
        vec![ForeignKey::new("projectId", "projects")]
    }

    #[test]
    fn existing_parent_passes() {
        let record = obj(json!({"id": "t1", "projectId": "p1"}));
        let result = check_references("tasks", &record, &fks(), |t, id| t == "projects" && id == "p1");
        assert!(result.is_ok());
    }

    #[test]
    fn missing_parent_fails() {
        let record = obj(json!({"id": "t1", "projectId": "p9"}));
        let err = check_references("tasks", &record, &fks(), |_, _| false).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::MissingParent {
                table: "tasks".into(),
                field: "projectId".into(),
                parent_table: "projects".into(),
                parent_id: "p9".into(),
            }
        );
    }

    #[test]
    fn null_or_absent_reference_is_allowed() {
        let never = |_: &str, _: &str| false;
        assert!(check_references("tasks", &obj(json!({"id": "t1"})), &fks(), never).is_ok());
        assert!(check_references(
            "tasks",
            &obj(json!({"id": "t1", "projectId": null})),
            &fks(),
            never
        )
        .is_ok());
    }

    #[test]
    fn numeric_reference_uses_decimal_id() {
        let record = obj(json!({"id": "t1", "projectId": 42}));
        assert!(check_references("tasks", &record, &fks(), |_, id| id == "42").is_ok());
    }
}
