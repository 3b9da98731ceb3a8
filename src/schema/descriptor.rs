use super::error::SchemaError;
use super::naming;

/// Storage type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
    Timestamp,
    /// Composite value stored as encoded JSON text
    Json,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }
}

/// What the write path does with a field besides storing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Plain,
    PrimaryKey,
    /// Stamped on insert
    Created,
    /// Stamped on insert and every update
    Updated,
    /// Soft-delete marker, stamped instead of removing the row
    Deleted,
    /// Optimistic-lock counter
    Version,
}

impl FieldRole {
    pub fn name(&self) -> &'static str {
        match self {
            FieldRole::Plain => "plain",
            FieldRole::PrimaryKey => "primary key",
            FieldRole::Created => "created",
            FieldRole::Updated => "updated",
            FieldRole::Deleted => "deleted",
            FieldRole::Version => "version",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field: String,
    pub column: String,
    pub column_type: ColumnType,
    pub role: FieldRole,
}

impl FieldDescriptor {
    /// Fields the coordinator writes itself: timestamps, soft-delete and version.
    pub fn is_auto_managed(&self) -> bool {
        matches!(
            self.role,
            FieldRole::Created | FieldRole::Updated | FieldRole::Deleted | FieldRole::Version
        )
    }
}

/// Static mapping metadata for one entity type. Immutable once built.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    entity: String,
    table: String,
    fields: Vec<FieldDescriptor>,
    primary_key: usize,
    auto_increment: bool,
    created: Option<usize>,
    updated: Option<usize>,
    deleted: Option<usize>,
    version: Option<usize>,
}

impl EntityDescriptor {
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[self.primary_key]
    }

    /// True when the store generates the key for a zero-valued primary key.
    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn created(&self) -> Option<&FieldDescriptor> {
        self.created.map(|i| &self.fields[i])
    }

    pub fn updated(&self) -> Option<&FieldDescriptor> {
        self.updated.map(|i| &self.fields[i])
    }

    pub fn soft_delete(&self) -> Option<&FieldDescriptor> {
        self.deleted.map(|i| &self.fields[i])
    }

    pub fn version(&self) -> Option<&FieldDescriptor> {
        self.version.map(|i| &self.fields[i])
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.field == name)
    }

    pub fn by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Resolve a caller-supplied name, trying the column name first and then the field name.
    pub fn resolve(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_column(name).or_else(|| self.field(name))
    }
}

/// Explicit, one-time declaration of an entity's mapping.
///
/// ```ignore
/// fn schema(s: SchemaBuilder) -> SchemaBuilder {
///     s.table("user")
///         .primary_key("id", ColumnType::Integer)
///         .field("name", ColumnType::Text).column_name("user_name")
///         .json("other")
///         .created("create_time")
///         .version("version")
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    entity: String,
    table: String,
    fields: Vec<FieldDescriptor>,
    auto_increment: bool,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    pub fn new(type_name: &str) -> Self {
        let base = type_name.split('<').next().unwrap_or(type_name);
        let entity = base.rsplit("::").next().unwrap_or(base).to_string();
        Self {
            entity,
            table: naming::default_table_name(type_name),
            fields: Vec::new(),
            auto_increment: true,
            error: None,
        }
    }

    /// Override the derived table name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = name.into();
        self
    }

    /// Integer keys are generated by the store unless `manual_key` is called.
    pub fn primary_key(self, field: impl Into<String>, column_type: ColumnType) -> Self {
        self.push(field.into(), column_type, FieldRole::PrimaryKey)
    }

    pub fn manual_key(mut self) -> Self {
        self.auto_increment = false;
        self
    }

    pub fn field(self, field: impl Into<String>, column_type: ColumnType) -> Self {
        self.push(field.into(), column_type, FieldRole::Plain)
    }

    pub fn json(self, field: impl Into<String>) -> Self {
        self.push(field.into(), ColumnType::Json, FieldRole::Plain)
    }

    pub fn created(self, field: impl Into<String>) -> Self {
        self.push(field.into(), ColumnType::Timestamp, FieldRole::Created)
    }

    pub fn updated(self, field: impl Into<String>) -> Self {
        self.push(field.into(), ColumnType::Timestamp, FieldRole::Updated)
    }

    pub fn deleted(self, field: impl Into<String>) -> Self {
        self.push(field.into(), ColumnType::Timestamp, FieldRole::Deleted)
    }

    pub fn version(self, field: impl Into<String>) -> Self {
        self.push(field.into(), ColumnType::Integer, FieldRole::Version)
    }

    /// Rename the storage column of the most recently declared field.
    pub fn column_name(mut self, column: impl Into<String>) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.column = column.into();
        } else {
            let entity = self.entity.clone();
            self.fail(SchemaError::DanglingRename { entity });
        }
        self
    }

    /// Attach a role to an already declared field.
    pub fn mark(mut self, field: &str, role: FieldRole) -> Self {
        let entity = self.entity.clone();
        let conflict = match self.fields.iter_mut().find(|f| f.field == field) {
            Some(existing) if existing.role == FieldRole::Plain || existing.role == role => {
                existing.role = role;
                None
            }
            Some(existing) => Some(SchemaError::ConflictingRole {
                entity,
                role: role.name(),
                first: format!("{} ({})", existing.field, existing.role.name()),
                second: field.to_string(),
            }),
            None => Some(SchemaError::InvalidIdentifier { entity, name: field.to_string() }),
        };
        if let Some(err) = conflict {
            self.fail(err);
        }
        self
    }

    pub fn build(self) -> Result<EntityDescriptor, SchemaError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let entity = self.entity;

        if !naming::is_identifier(&self.table) {
            return Err(SchemaError::InvalidIdentifier { entity, name: self.table });
        }

        for (i, f) in self.fields.iter().enumerate() {
            for name in [&f.field, &f.column] {
                if !naming::is_identifier(name) {
                    return Err(SchemaError::InvalidIdentifier { entity, name: name.clone() });
                }
            }
            let earlier = &self.fields[..i];
            if earlier.iter().any(|e| e.field == f.field) {
                return Err(SchemaError::DuplicateField { entity, field: f.field.clone() });
            }
            if earlier.iter().any(|e| e.column == f.column) {
                return Err(SchemaError::DuplicateColumn { entity, column: f.column.clone() });
            }
        }

        let single = |role: FieldRole| -> Result<Option<usize>, SchemaError> {
            let mut found: Option<usize> = None;
            for (i, f) in self.fields.iter().enumerate().filter(|(_, f)| f.role == role) {
                if let Some(first) = found {
                    return Err(SchemaError::ConflictingRole {
                        entity: entity.clone(),
                        role: role.name(),
                        first: self.fields[first].field.clone(),
                        second: f.field.clone(),
                    });
                }
                found = Some(i);
            }
            Ok(found)
        };

        let primary_key = single(FieldRole::PrimaryKey)?
            .ok_or_else(|| SchemaError::MissingPrimaryKey(entity.clone()))?;
        let created = single(FieldRole::Created)?;
        let updated = single(FieldRole::Updated)?;
        let deleted = single(FieldRole::Deleted)?;
        let version = single(FieldRole::Version)?;

        let expect = |index: Option<usize>, role: FieldRole, types: &[ColumnType], expected: &'static str| {
            match index.map(|i| &self.fields[i]) {
                Some(f) if !types.contains(&f.column_type) => Err(SchemaError::RoleTypeMismatch {
                    entity: entity.clone(),
                    role: role.name(),
                    field: f.field.clone(),
                    expected,
                }),
                _ => Ok(()),
            }
        };
        expect(version, FieldRole::Version, &[ColumnType::Integer], "integer")?;
        for (index, role) in [(created, FieldRole::Created), (updated, FieldRole::Updated), (deleted, FieldRole::Deleted)] {
            expect(index, role, &[ColumnType::Timestamp], "timestamp")?;
        }

        let auto_increment =
            self.auto_increment && self.fields[primary_key].column_type == ColumnType::Integer;

        Ok(EntityDescriptor {
            entity,
            table: self.table,
            fields: self.fields,
            primary_key,
            auto_increment,
            created,
            updated,
            deleted,
            version,
        })
    }

    fn push(mut self, field: String, column_type: ColumnType, role: FieldRole) -> Self {
        self.fields.push(FieldDescriptor { column: field.clone(), field, column_type, role });
        self
    }

    fn fail(&mut self, err: SchemaError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
