// JSON snapshot reading

use std::path::Path;

use serde_json::{Map, Value};

/// Read a JSON snapshot: either an array of row objects, or an object whose
/// `records` array holds them (API dump layout). Airtable-style rows with a
/// nested `fields` object are flattened, keeping `id` alongside.
pub fn read_rows(path: &Path) -> Result<Vec<Map<String, Value>>, String> {
    let content = crate::csv::read_file_as_utf8(path)?;
    rows_from_str(&content)
}

fn rows_from_str(content: &str) -> Result<Vec<Map<String, Value>>, String> {
    let doc: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected an array of rows or an object with a 'records' array".into()),
        },
        _ => return Err("expected an array of rows or an object with a 'records' array".into()),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(row) => Ok(flatten(row)),
            other => Err(format!("row {idx}: expected an object, got {other}")),
        })
        .collect()
}

fn flatten(mut row: Map<String, Value>) -> Map<String, Value> {
    match row.remove("fields") {
        Some(Value::Object(mut fields)) => {
            if let Some(id) = row.remove("id") {
                fields.entry("id").or_insert(id);
            }
            fields
        }
        Some(other) => {
            row.insert("fields".into(), other);
            row
        }
        None => row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_array() {
        let rows = rows_from_str(r#"[{"id": 1, "name": "A"}, {"id": 2}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("A"));
    }

    #[test]
    fn test_records_envelope_is_flattened() {
        let rows = rows_from_str(
            r#"{"records": [{"id": "recX", "createdTime": "2024-01-01", "fields": {"name": "A"}}]}"#,
        )
        .unwrap();
        assert_eq!(rows[0]["id"], json!("recX"));
        assert_eq!(rows[0]["name"], json!("A"));
        assert!(!rows[0].contains_key("createdTime"));
    }

    #[test]
    fn test_rejects_non_object_rows() {
        let err = rows_from_str("[1, 2]").unwrap_err();
        assert!(err.starts_with("row 0"));
        assert!(rows_from_str(r#"{"data": []}"#).is_err());
    }
}
