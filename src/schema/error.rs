use thiserror::Error;

/// Bad or missing entity metadata. Fatal to the calling operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Entity '{0}' declares no primary key")]
    MissingPrimaryKey(String),

    #[error("Entity '{entity}' marks both '{first}' and '{second}' as {role}")]
    ConflictingRole {
        entity: String,
        role: &'static str,
        first: String,
        second: String,
    },

    #[error("Entity '{entity}' declares field '{field}' more than once")]
    DuplicateField { entity: String, field: String },

    #[error("Entity '{entity}' maps column '{column}' more than once")]
    DuplicateColumn { entity: String, column: String },

    #[error("Entity '{entity}': invalid identifier '{name}'")]
    InvalidIdentifier { entity: String, name: String },

    #[error("Entity '{entity}': column rename without a preceding field")]
    DanglingRename { entity: String },

    #[error("Entity '{entity}': {role} field '{field}' must be of type {expected}")]
    RoleTypeMismatch {
        entity: String,
        role: &'static str,
        field: String,
        expected: &'static str,
    },
}
