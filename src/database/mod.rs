pub mod executor;
pub mod manager;
pub mod postgres;
pub mod query_builder;
pub mod sqlite;
pub mod writer;

pub use executor::{ExecResult, ExecutionError, Executor, Row};
pub use manager::{Database, DatabaseError};
pub use query_builder::{query, Query};
pub use writer::{WriteCoordinator, WritePhase};
