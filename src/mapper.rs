//! Conversion between entities and storage rows.
//!
//! Entities cross this boundary through their serde representation: a JSON
//! object keyed by field name. The descriptor decides which fields map to
//! which columns and which ones the write path stamps itself.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::database::executor::Row;
use crate::filter::{Assignment, ColumnSelection, Param};
use crate::schema::{ColumnType, Entity, EntityDescriptor, FieldDescriptor, FieldRole};

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Entity '{entity}' did not serialize to an object")]
    NotAnObject { entity: String },

    #[error("Cannot encode field '{field}' of '{entity}': {message}")]
    Encode { entity: String, field: String, message: String },

    #[error("Column '{column}' of '{entity}' holds undecodable JSON: {message}")]
    InvalidJson { entity: String, column: String, message: String },

    #[error("Row does not fit entity '{entity}': {message}")]
    Decode { entity: String, message: String },
}

/// Which write a row is being prepared for.
#[derive(Debug, Clone, Copy)]
pub enum RowIntent<'a> {
    Insert,
    Update(&'a ColumnSelection),
}

/// Column values for one write, plus what the caller's entity should be told afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowWrite {
    pub assignments: Vec<Assignment>,
    /// `(column, previous version)` the update must match
    pub version_guard: Option<(String, Value)>,
    /// `(field, value)` pairs the mapper produced rather than the caller
    pub stamped: Vec<(String, Value)>,
    pub key: Value,
}

impl RowWrite {
    pub fn columns(&self) -> Vec<String> {
        self.assignments.iter().map(|a| a.column().to_string()).collect()
    }

    /// Bound values in column order; increments have no value of their own.
    pub fn params(&self) -> Vec<Param> {
        self.assignments
            .iter()
            .filter_map(|a| match a {
                Assignment::Value { value, .. } => Some(value.clone()),
                Assignment::Increment { .. } => None,
            })
            .collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.params().into_iter().map(|p| p.value).collect()
    }
}

/// Zero values are skipped by default updates: null, false, 0, "", [] and {}.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

pub fn timestamp_value(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// The entity's serde object, keyed by field name.
pub fn entity_fields<T: Entity>(entity: &T, descriptor: &EntityDescriptor) -> Result<Map<String, Value>, MappingError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MappingError::NotAnObject { entity: descriptor.entity_name().to_string() }),
        Err(e) => Err(MappingError::Encode {
            entity: descriptor.entity_name().to_string(),
            field: String::new(),
            message: e.to_string(),
        }),
    }
}

/// Fill `out` from a row. Columns are matched by name; unmapped columns are
/// ignored, missing or NULL columns leave the field at its default, and when
/// a column name repeats (joins) the first occurrence wins.
pub fn to_entity<T: Entity>(row: &Row, descriptor: &EntityDescriptor, out: &mut T) -> Result<(), MappingError> {
    let mut fields = entity_fields(&T::default(), descriptor)?;
    let mut assigned: Vec<&str> = Vec::new();

    for (column, raw) in row.iter() {
        let Some(field) = descriptor.by_column(column) else { continue };
        if assigned.contains(&field.field.as_str()) {
            continue;
        }
        assigned.push(&field.field);
        let value = decode(descriptor, field, raw)?;
        if !value.is_null() {
            fields.insert(field.field.clone(), value);
        }
    }

    *out = serde_json::from_value(Value::Object(fields)).map_err(|e| MappingError::Decode {
        entity: descriptor.entity_name().to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Prepare the column values of an insert or update.
///
/// Inserts write every mapped field except a zero auto-increment key and
/// the soft-delete column, stamp the created/updated timestamps and start
/// the version at 1. Updates stamp the updated timestamp, bump the
/// version behind a guard on its previous value, and write the plain fields
/// admitted by the column selection.
pub fn to_row<T: Entity>(
    entity: &T,
    descriptor: &EntityDescriptor,
    intent: RowIntent<'_>,
    now: DateTime<Utc>,
) -> Result<RowWrite, MappingError> {
    let fields = entity_fields(entity, descriptor)?;
    let stamp = timestamp_value(now);
    let mut write = RowWrite {
        key: fields.get(&descriptor.primary_key().field).cloned().unwrap_or(Value::Null),
        ..Default::default()
    };

    for f in descriptor.fields() {
        let current = fields.get(&f.field).cloned().unwrap_or(Value::Null);
        let assign = |value: Value| Assignment::Value {
            column: f.column.clone(),
            value: Param::typed(value, f.column_type),
        };

        match (intent, f.role) {
            (RowIntent::Insert, FieldRole::PrimaryKey) => {
                if !(descriptor.is_auto_increment() && is_zero(&current)) {
                    write.assignments.push(assign(current));
                }
            }
            (RowIntent::Insert, FieldRole::Created | FieldRole::Updated) => {
                write.assignments.push(assign(stamp.clone()));
                write.stamped.push((f.field.clone(), stamp.clone()));
            }
            (RowIntent::Insert, FieldRole::Deleted) => {}
            (RowIntent::Insert, FieldRole::Version) => {
                let version = if is_zero(&current) { Value::from(1) } else { current };
                write.stamped.push((f.field.clone(), version.clone()));
                write.assignments.push(assign(version));
            }
            (RowIntent::Update(_), FieldRole::PrimaryKey | FieldRole::Created | FieldRole::Deleted) => {}
            (RowIntent::Update(_), FieldRole::Updated) => {
                write.assignments.push(assign(stamp.clone()));
                write.stamped.push((f.field.clone(), stamp.clone()));
            }
            (RowIntent::Update(_), FieldRole::Version) => {
                let previous = current.as_i64().unwrap_or(0);
                let next = previous.checked_add(1).ok_or_else(|| MappingError::Encode {
                    entity: descriptor.entity_name().to_string(),
                    field: f.field.clone(),
                    message: format!("version {} cannot be incremented", previous),
                })?;
                write.assignments.push(Assignment::Increment { column: f.column.clone() });
                write.version_guard = Some((f.column.clone(), current));
                write.stamped.push((f.field.clone(), Value::from(next)));
            }
            (RowIntent::Insert, FieldRole::Plain) => {
                write.assignments.push(assign(encode(descriptor, f, current)?));
            }
            (RowIntent::Update(selection), FieldRole::Plain) => {
                if selection.includes(&f.column, is_zero(&current)) {
                    write.assignments.push(assign(encode(descriptor, f, current)?));
                }
            }
        }
    }

    Ok(write)
}

/// Non-zero key and plain fields of an entity, as `(column, value)` equality conditions.
pub fn example_conditions<T: Entity>(entity: &T, descriptor: &EntityDescriptor) -> Result<Vec<(String, Value)>, MappingError> {
    let fields = entity_fields(entity, descriptor)?;
    Ok(descriptor
        .fields()
        .iter()
        .filter(|f| matches!(f.role, FieldRole::Plain | FieldRole::PrimaryKey))
        .filter(|f| f.column_type != ColumnType::Json)
        .filter_map(|f| {
            let value = fields.get(&f.field)?;
            (!is_zero(value)).then(|| (f.column.clone(), value.clone()))
        })
        .collect())
}

/// Overwrite selected fields of an entity, e.g. a generated key or stamped timestamps.
pub fn apply_fields<T: Entity>(entity: &mut T, descriptor: &EntityDescriptor, values: &[(String, Value)]) -> Result<(), MappingError> {
    if values.is_empty() {
        return Ok(());
    }
    let mut fields = entity_fields(entity, descriptor)?;
    for (field, value) in values {
        let decoded = match descriptor.field(field) {
            Some(f) => decode(descriptor, f, value)?,
            None => value.clone(),
        };
        fields.insert(field.clone(), decoded);
    }
    *entity = serde_json::from_value(Value::Object(fields)).map_err(|e| MappingError::Decode {
        entity: descriptor.entity_name().to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Decode one raw value of `column`; columns the entity does not map pass through.
pub fn decode_column(descriptor: &EntityDescriptor, column: &str, raw: &Value) -> Result<Value, MappingError> {
    match descriptor.by_column(column) {
        Some(field) => decode(descriptor, field, raw),
        None => Ok(raw.clone()),
    }
}

fn encode(descriptor: &EntityDescriptor, field: &FieldDescriptor, value: Value) -> Result<Value, MappingError> {
    match (field.column_type, value) {
        (ColumnType::Json, Value::Null) => Ok(Value::Null),
        (ColumnType::Json, v) => serde_json::to_string(&v).map(Value::String).map_err(|e| MappingError::Encode {
            entity: descriptor.entity_name().to_string(),
            field: field.field.clone(),
            message: e.to_string(),
        }),
        (_, v) => Ok(v),
    }
}

/// Normalise a raw column value into what the field's serde form expects.
fn decode(descriptor: &EntityDescriptor, field: &FieldDescriptor, raw: &Value) -> Result<Value, MappingError> {
    Ok(match (field.column_type, raw) {
        (ColumnType::Json, Value::String(text)) => serde_json::from_str(text).map_err(|e| MappingError::InvalidJson {
            entity: descriptor.entity_name().to_string(),
            column: field.column.clone(),
            message: e.to_string(),
        })?,
        (ColumnType::Bool, Value::Number(n)) => Value::Bool(n.as_f64().map_or(false, |f| f != 0.0)),
        (ColumnType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| raw.clone()),
        (ColumnType::Integer, Value::Number(n)) if n.as_i64().is_none() => {
            n.as_f64().map(|f| Value::from(f.trunc() as i64)).unwrap_or_else(|| raw.clone())
        }
        (ColumnType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| raw.clone()),
        _ => raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Member {
        id: i64,
        name: String,
        age: i32,
        active: bool,
        other: BTreeMap<String, String>,
        create_time: Option<DateTime<Utc>>,
        update_time: Option<DateTime<Utc>>,
        delete_time: Option<DateTime<Utc>>,
        version: i64,
    }

    impl Entity for Member {
        fn schema(schema: SchemaBuilder) -> SchemaBuilder {
            schema
                .primary_key("id", ColumnType::Integer)
                .field("name", ColumnType::Text)
                .column_name("user_name")
                .field("age", ColumnType::Integer)
                .field("active", ColumnType::Bool)
                .json("other")
                .created("create_time")
                .updated("update_time")
                .deleted("delete_time")
                .version("version")
        }
    }

    fn descriptor() -> EntityDescriptor {
        Member::schema(SchemaBuilder::new("Member")).build().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample() -> Member {
        let mut other = BTreeMap::new();
        other.insert("bula".to_string(), "didi".to_string());
        Member { name: "bulabula".into(), age: 17, active: true, other, ..Default::default() }
    }

    #[test]
    fn insert_row_round_trips_plain_fields() {
        let d = descriptor();
        let original = sample();
        let write = to_row(&original, &d, RowIntent::Insert, now()).unwrap();

        assert!(!write.columns().contains(&"id".to_string()), "zero auto key must be omitted");
        let row = Row::new(write.columns().into_iter().zip(write.values()).collect());

        let mut restored = Member::default();
        to_entity(&row, &d, &mut restored).unwrap();
        assert_eq!(restored.name, original.name);
        assert_eq!(restored.age, original.age);
        assert_eq!(restored.active, original.active);
        assert_eq!(restored.other, original.other);
        assert_eq!(restored.create_time, Some(now()));
        assert_eq!(restored.version, 1);
        assert_eq!(restored.delete_time, None);
    }

    #[test]
    fn insert_encodes_json_and_stamps() {
        let d = descriptor();
        let write = to_row(&sample(), &d, RowIntent::Insert, now()).unwrap();
        let by_column: BTreeMap<String, Value> = write.columns().into_iter().zip(write.values()).collect();
        assert_eq!(by_column["other"], json!("{\"bula\":\"didi\"}"));
        assert_eq!(by_column["create_time"], json!("2024-05-01T12:00:00.000000Z"));
        assert!(!by_column.contains_key("delete_time"));
        assert_eq!(by_column["version"], json!(1));
        assert!(write.stamped.iter().any(|(f, _)| f == "update_time"));
    }

    #[test]
    fn default_update_skips_zero_fields() {
        let d = descriptor();
        let member = Member { id: 4, age: 18, version: 2, ..Default::default() };
        let selection = ColumnSelection::default();
        let write = to_row(&member, &d, RowIntent::Update(&selection), now()).unwrap();
        assert_eq!(write.columns(), vec!["age", "update_time", "version"]);
        assert_eq!(write.version_guard, Some(("version".to_string(), json!(2))));
        assert!(write.stamped.contains(&("version".to_string(), json!(3))));
        assert_eq!(write.key, json!(4));
    }

    #[test]
    fn exhausted_version_is_a_mapping_error() {
        let d = descriptor();
        let member = Member { id: 4, age: 18, version: i64::MAX, ..Default::default() };
        let selection = ColumnSelection::default();
        let err = to_row(&member, &d, RowIntent::Update(&selection), now()).unwrap_err();
        assert!(matches!(err, MappingError::Encode { ref field, .. } if field == "version"), "{err}");
    }

    #[test]
    fn all_cols_writes_zero_fields() {
        let d = descriptor();
        let member = Member { id: 4, age: 18, ..Default::default() };
        let selection = ColumnSelection { all_cols: true, ..Default::default() };
        let write = to_row(&member, &d, RowIntent::Update(&selection), now()).unwrap();
        assert_eq!(write.columns(), vec!["user_name", "age", "active", "other", "update_time", "version"]);
    }

    #[test]
    fn cols_and_must_cols_win_over_zero_suppression() {
        let d = descriptor();
        let member = Member { id: 4, name: "kept".into(), ..Default::default() };

        let cols = ColumnSelection { cols: vec!["age".into()], ..Default::default() };
        let write = to_row(&member, &d, RowIntent::Update(&cols), now()).unwrap();
        assert_eq!(write.columns(), vec!["age", "update_time", "version"]);

        let must = ColumnSelection { must_cols: vec!["age".into()], ..Default::default() };
        let write = to_row(&member, &d, RowIntent::Update(&must), now()).unwrap();
        assert_eq!(write.columns(), vec!["user_name", "age", "update_time", "version"]);
    }

    #[test]
    fn decodes_loose_column_values() {
        let d = descriptor();
        let row = Row::new(vec![
            ("id".into(), json!("12")),
            ("active".into(), json!(1)),
            ("unmapped".into(), json!("ignored")),
            ("user_name".into(), Value::Null),
        ]);
        let mut m = Member { name: "stale".into(), ..Default::default() };
        to_entity(&row, &d, &mut m).unwrap();
        assert_eq!(m.id, 12);
        assert!(m.active);
        assert_eq!(m.name, "", "fields are reset to default before mapping");
    }

    #[test]
    fn bad_json_is_a_mapping_error() {
        let d = descriptor();
        let row = Row::new(vec![("other".into(), json!("{not json"))]);
        let mut m = Member::default();
        let err = to_entity(&row, &d, &mut m).unwrap_err();
        assert!(matches!(err, MappingError::InvalidJson { ref column, .. } if column == "other"), "{err}");
    }

    #[test]
    fn example_conditions_use_non_zero_plain_fields() {
        let d = descriptor();
        let m = Member { name: "a".into(), version: 3, ..Default::default() };
        assert_eq!(example_conditions(&m, &d).unwrap(), vec![("user_name".to_string(), json!("a"))]);
    }

    #[test]
    fn apply_fields_reflects_generated_values() {
        let d = descriptor();
        let mut m = sample();
        apply_fields(&mut m, &d, &[("id".into(), json!(9)), ("version".into(), json!(1))]).unwrap();
        assert_eq!(m.id, 9);
        assert_eq!(m.version, 1);
        assert_eq!(m.name, "bulabula");
    }
}
