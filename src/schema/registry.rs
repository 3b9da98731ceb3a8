use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::descriptor::{EntityDescriptor, SchemaBuilder};
use super::error::SchemaError;

/// An in-memory record mapped to a table row.
///
/// Implementors declare their mapping once through [`SchemaBuilder`]; values
/// travel between the entity and the store through its serde representation,
/// keyed by field name.
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder;
}

type Slot = Arc<OnceLock<Result<Arc<EntityDescriptor>, SchemaError>>>;

/// Process-wide descriptor cache keyed by entity type.
///
/// The map lock is only held to find or create the slot for a type. The
/// descriptor itself is computed inside the slot's `OnceLock`, so concurrent
/// first callers for the same type wait on a single computation and all
/// observe the same `Arc`.
pub struct Registry {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    pub fn global() -> &'static Registry {
        static INSTANCE: OnceLock<Registry> = OnceLock::new();
        INSTANCE.get_or_init(Registry::new)
    }

    pub fn describe<T: Entity>(&self) -> Result<Arc<EntityDescriptor>, SchemaError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.entry(TypeId::of::<T>()).or_default().clone()
        };

        slot.get_or_init(|| {
            let type_name = std::any::type_name::<T>();
            let built = T::schema(SchemaBuilder::new(type_name)).build().map(Arc::new);
            match &built {
                Ok(d) => tracing::debug!(
                    "Registered entity {} -> table \"{}\" ({} fields)",
                    d.entity_name(),
                    d.table(),
                    d.fields().len()
                ),
                Err(e) => tracing::debug!("Entity {} failed to register: {}", type_name, e),
            }
            built
        })
        .clone()
    }

    pub fn table_name<T: Entity>(&self) -> Result<String, SchemaError> {
        Ok(self.describe::<T>()?.table().to_string())
    }

    /// Number of entity types seen so far, including ones that failed to describe.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Describe `T` through the global registry.
pub fn describe<T: Entity>() -> Result<Arc<EntityDescriptor>, SchemaError> {
    Registry::global().describe::<T>()
}

pub fn table_name<T: Entity>() -> Result<String, SchemaError> {
    Registry::global().table_name::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counted {
        id: i64,
    }

    impl Entity for Counted {
        fn schema(schema: SchemaBuilder) -> SchemaBuilder {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            schema.primary_key("id", ColumnType::Integer)
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Keyless {
        name: String,
    }

    impl Entity for Keyless {
        fn schema(schema: SchemaBuilder) -> SchemaBuilder {
            schema.field("name", ColumnType::Text)
        }
    }

    #[test]
    fn concurrent_first_use_computes_once() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.describe::<Counted>().unwrap())
            })
            .collect();
        let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        for d in &descriptors[1..] {
            assert!(Arc::ptr_eq(&descriptors[0], d));
        }
        assert_eq!(registry.table_name::<Counted>().unwrap(), "counteds");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schema_errors_are_cached_and_repeated() {
        let registry = Registry::new();
        let first = registry.describe::<Keyless>().unwrap_err();
        let second = registry.describe::<Keyless>().unwrap_err();
        assert_eq!(first, SchemaError::MissingPrimaryKey("Keyless".to_string()));
        assert_eq!(first, second);
    }
}
