// Error type returned by every query and write terminal
use thiserror::Error;

use crate::database::executor::ExecutionError;
use crate::database::manager::DatabaseError;
use crate::filter::FilterError;
use crate::mapper::MappingError;
use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A versioned update matched no row. Without `verify_conflicts()` this
    /// also covers rows that no longer match the filter at all.
    #[error("Optimistic lock conflict on '{table}': version {version} is no longer current")]
    OptimisticLock { table: String, version: i64 },
}

impl OrmError {
    /// Stable code for callers that branch on the failure kind
    pub fn error_code(&self) -> &'static str {
        match self {
            OrmError::Schema(_) => "SCHEMA_ERROR",
            OrmError::Filter(_) => "INVALID_QUERY",
            OrmError::Mapping(_) => "MAPPING_ERROR",
            OrmError::Execution(_) => "EXECUTION_ERROR",
            OrmError::Database(_) => "CONNECTION_ERROR",
            OrmError::OptimisticLock { .. } => "OPTIMISTIC_LOCK",
        }
    }

    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, OrmError::OptimisticLock { .. })
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        OrmError::Execution(ExecutionError::Sqlx(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_wrapped_kind() {
        let err: OrmError = FilterError::NothingToUpdate.into();
        assert_eq!(err.error_code(), "INVALID_QUERY");
        assert!(!err.is_optimistic_lock());

        let err: OrmError = SchemaError::MissingPrimaryKey("Thing".into()).into();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");

        let err = OrmError::OptimisticLock { table: "user".into(), version: 3 };
        assert!(err.is_optimistic_lock());
        assert_eq!(err.error_code(), "OPTIMISTIC_LOCK");
        assert!(err.to_string().contains("version 3"));
    }

    #[test]
    fn executor_errors_pass_through_verbatim() {
        let err: OrmError = ExecutionError::Other("disk full".into()).into();
        assert_eq!(err.to_string(), "disk full");
    }
}
