pub mod descriptor;
pub mod error;
pub mod naming;
pub mod registry;

pub use descriptor::{ColumnType, EntityDescriptor, FieldDescriptor, FieldRole, SchemaBuilder};
pub use error::SchemaError;
pub use registry::{describe, table_name, Entity, Registry};
