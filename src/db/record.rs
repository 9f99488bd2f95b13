//! Payload preparation for create and update.
//!
//! Incoming JSON is checked against the entity definition: required fields
//! must be present, values must coerce to their column types, and
//! server-assigned fields (`id`, `created_at`, `updated_at`, `tenant_id`) are
//! stripped so identifiers stay immutable and timestamps stay server-owned.
//! Nested child collections are split out of the parent payload; an empty
//! collection is dropped entirely so no empty relation is ever created.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::query::types::{coerce_json, SqlParam};
use crate::registry::{EntityDef, FieldDef, HasMany};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Validation failed")]
    Invalid(HashMap<String, String>),
}

/// One child row, validated against its own entity definition. The
/// foreign-key column back to the parent is filled in at insert time.
#[derive(Debug)]
pub struct ChildPlan {
    pub columns: Vec<(&'static FieldDef, SqlParam)>,
}

#[derive(Debug)]
pub struct InsertPlan {
    pub columns: Vec<(&'static FieldDef, SqlParam)>,
    pub children: Vec<(&'static HasMany, Vec<ChildPlan>)>,
}

pub fn prepare_insert(def: &'static EntityDef, payload: Value) -> Result<InsertPlan, RecordError> {
    let Value::Object(map) = payload else {
        return Err(RecordError::InvalidJson("expected a JSON object".to_string()));
    };

    let mut field_errors = HashMap::new();
    let columns = collect_columns(def, &map, None, "", &mut field_errors);

    let mut children = Vec::new();
    for rel in def.has_many {
        let Some(value) = map.get(rel.name) else { continue };
        let Value::Array(items) = value else { continue };
        if items.is_empty() {
            // dropped: an empty collection must not create an empty relation
            continue;
        }
        let child_def = match crate::registry::by_name(rel.entity) {
            Some(d) => d,
            None => continue,
        };
        let mut plans = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let prefix = format!("{}[{}].", rel.name, i);
            match item {
                Value::Object(child_map) => {
                    let columns =
                        collect_columns(child_def, child_map, Some(rel.fk), &prefix, &mut field_errors);
                    plans.push(ChildPlan { columns });
                }
                _ => {
                    field_errors.insert(
                        format!("{}[{}]", rel.name, i),
                        "expected an object".to_string(),
                    );
                }
            }
        }
        children.push((rel, plans));
    }

    if field_errors.is_empty() {
        Ok(InsertPlan { columns, children })
    } else {
        Err(RecordError::Invalid(field_errors))
    }
}

/// Update accepts any subset of the writable fields; everything else in the
/// payload (system fields, relations, unknown keys) is ignored.
pub fn prepare_update(
    def: &'static EntityDef,
    payload: Value,
) -> Result<Vec<(&'static FieldDef, SqlParam)>, RecordError> {
    let Value::Object(map) = payload else {
        return Err(RecordError::InvalidJson("expected a JSON object".to_string()));
    };

    let mut field_errors = HashMap::new();
    let mut changes = Vec::new();
    for field in def.fields {
        let Some(value) = map.get(field.name) else { continue };
        match coerce_json(field.kind, value) {
            Ok(SqlParam::Null) if field.required => {
                field_errors.insert(field.name.to_string(), "This field is required".to_string());
            }
            Ok(param) => changes.push((field, param)),
            Err(message) => {
                field_errors.insert(field.name.to_string(), message);
            }
        }
    }

    if field_errors.is_empty() {
        Ok(changes)
    } else {
        Err(RecordError::Invalid(field_errors))
    }
}

/// Walk the entity's writable fields against a payload object, accumulating
/// per-field errors. `preset_fk` is a column the caller will supply itself
/// (the parent id on nested creates) and is exempt from the required check.
fn collect_columns(
    def: &'static EntityDef,
    map: &serde_json::Map<String, Value>,
    preset_fk: Option<&str>,
    error_prefix: &str,
    field_errors: &mut HashMap<String, String>,
) -> Vec<(&'static FieldDef, SqlParam)> {
    let mut columns = Vec::new();
    for field in def.fields {
        if preset_fk == Some(field.name) {
            continue;
        }
        match map.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    field_errors.insert(
                        format!("{error_prefix}{}", field.name),
                        "This field is required".to_string(),
                    );
                }
            }
            Some(value) => match coerce_json(field.kind, value) {
                Ok(param) => columns.push((field, param)),
                Err(message) => {
                    field_errors.insert(format!("{error_prefix}{}", field.name), message);
                }
            },
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use serde_json::json;

    fn appointment_payload() -> Value {
        json!({
            "date": "2024-03-01",
            "start_time": "2024-03-01T09:00:00Z",
            "end_time": "2024-03-01T09:30:00Z",
            "status": "booked",
            "patient_id": "7a0f8f6e-2f1e-4a8e-9b1a-111111111111",
            "doctor_id": "7a0f8f6e-2f1e-4a8e-9b1a-222222222222",
            "organization_id": "7a0f8f6e-2f1e-4a8e-9b1a-333333333333",
        })
    }

    #[test]
    fn full_payload_produces_all_columns() {
        let def = registry::by_name("appointment").unwrap();
        let plan = prepare_insert(def, appointment_payload()).unwrap();
        assert_eq!(plan.columns.len(), 7);
        assert!(plan.children.is_empty());
    }

    #[test]
    fn missing_required_fields_are_reported_per_field() {
        let def = registry::by_name("appointment").unwrap();
        let err = prepare_insert(def, json!({ "status": "booked" })).unwrap_err();
        match err {
            RecordError::Invalid(fields) => {
                assert!(fields.contains_key("date"));
                assert!(fields.contains_key("patient_id"));
                assert!(!fields.contains_key("status"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn system_fields_are_stripped() {
        let def = registry::by_name("appointment").unwrap();
        let mut payload = appointment_payload();
        payload["id"] = json!("7a0f8f6e-2f1e-4a8e-9b1a-999999999999");
        payload["created_at"] = json!("2020-01-01T00:00:00Z");
        let plan = prepare_insert(def, payload).unwrap();
        assert!(plan.columns.iter().all(|(f, _)| f.name != "id" && f.name != "created_at"));
    }

    #[test]
    fn empty_child_collection_is_dropped() {
        let def = registry::by_name("organization").unwrap();
        let plan = prepare_insert(
            def,
            json!({
                "name": "North Clinic",
                "user_id": "7a0f8f6e-2f1e-4a8e-9b1a-444444444444",
                "appointment": [],
                "medical_staff": [],
            }),
        )
        .unwrap();
        assert!(plan.children.is_empty());
    }

    #[test]
    fn non_empty_child_collection_is_validated_and_kept() {
        let def = registry::by_name("organization").unwrap();
        let plan = prepare_insert(
            def,
            json!({
                "name": "North Clinic",
                "user_id": "7a0f8f6e-2f1e-4a8e-9b1a-444444444444",
                "medical_staff": [{
                    "specialty": "cardiology",
                    "license_number": "L-1234",
                    "user_id": "7a0f8f6e-2f1e-4a8e-9b1a-555555555555",
                }],
            }),
        )
        .unwrap();
        assert_eq!(plan.children.len(), 1);
        let (rel, rows) = &plan.children[0];
        assert_eq!(rel.name, "medical_staff");
        assert_eq!(rows.len(), 1);
        // organization_id is the preset fk and must not be required here
        assert!(rows[0].columns.iter().all(|(f, _)| f.name != "organization_id"));
    }

    #[test]
    fn child_errors_are_prefixed_with_index() {
        let def = registry::by_name("organization").unwrap();
        let err = prepare_insert(
            def,
            json!({
                "name": "North Clinic",
                "user_id": "7a0f8f6e-2f1e-4a8e-9b1a-444444444444",
                "medical_staff": [{ "specialty": "cardiology" }],
            }),
        )
        .unwrap_err();
        match err {
            RecordError::Invalid(fields) => {
                assert!(fields.contains_key("medical_staff[0].license_number"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn update_takes_any_subset_and_ignores_the_rest() {
        let def = registry::by_name("appointment").unwrap();
        let changes = prepare_update(
            def,
            json!({
                "status": "cancelled",
                "id": "7a0f8f6e-2f1e-4a8e-9b1a-999999999999",
                "nonsense": true,
            }),
        )
        .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.name, "status");
    }

    #[test]
    fn update_rejects_nulling_a_required_field() {
        let def = registry::by_name("appointment").unwrap();
        let err = prepare_update(def, json!({ "status": null })).unwrap_err();
        assert!(matches!(err, RecordError::Invalid(_)));
    }
}
