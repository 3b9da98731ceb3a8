pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod mapper;
pub mod schema;

pub use database::{query, Database, ExecResult, ExecutionError, Executor, Query, Row};
pub use error::OrmError;
pub use filter::{JoinKind, Param, SortDirection};
pub use mapper::MappingError;
pub use schema::{describe, table_name, ColumnType, Entity, EntityDescriptor, SchemaBuilder, SchemaError};
