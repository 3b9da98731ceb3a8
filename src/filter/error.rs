use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Placeholder count mismatch in '{fragment}': {placeholders} placeholder(s), {params} parameter(s)")]
    ParamArity {
        fragment: String,
        placeholders: usize,
        params: usize,
    },

    #[error("Empty {0} fragment")]
    EmptyFragment(&'static str),

    #[error("Refusing {0} without any condition")]
    UnboundedWrite(&'static str),

    #[error("No columns left to update")]
    NothingToUpdate,

    #[error("Nothing to insert")]
    NothingToInsert,

    #[error("Insert mixes explicit and generated primary keys")]
    MixedPrimaryKeys,
}
