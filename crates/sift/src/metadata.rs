//! Resource metadata: storage types, associations, filters and pagination
//! attributes, loaded from a TOML document.
//!
//! Metadata answers the questions filters and the pagination policy ask about
//! a resource: is this property mapped, what is its storage type, which
//! associations does a dotted path walk through, and which pagination
//! attribute applies to a given operation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Declared storage type of a mapped property.
///
/// Unknown type names are rejected when the metadata is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    SmallInt,
    #[serde(alias = "int")]
    Integer,
    BigInt,
    Decimal,
    Float,
    String,
    Text,
    Boolean,
    Date,
    DateTime,
    Json,
    Id,
}

/// How a numeric storage type is validated and coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericClass {
    /// Whole numbers, bound as integers of the column width.
    Integer,
    /// Arbitrary precision, bound as a validated string cast to `numeric`.
    Decimal,
    /// Binary floating point, bound as `f64`.
    Float,
}

impl StorageType {
    /// Numeric classification, or `None` for non-numeric types.
    pub fn numeric_class(self) -> Option<NumericClass> {
        match self {
            StorageType::SmallInt | StorageType::Integer | StorageType::BigInt => {
                Some(NumericClass::Integer)
            }
            StorageType::Decimal => Some(NumericClass::Decimal),
            StorageType::Float => Some(NumericClass::Float),
            _ => None,
        }
    }

    /// Type name as written in metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            StorageType::SmallInt => "smallint",
            StorageType::Integer => "integer",
            StorageType::BigInt => "bigint",
            StorageType::Decimal => "decimal",
            StorageType::Float => "float",
            StorageType::String => "string",
            StorageType::Text => "text",
            StorageType::Boolean => "boolean",
            StorageType::Date => "date",
            StorageType::DateTime => "datetime",
            StorageType::Json => "json",
            StorageType::Id => "id",
        }
    }
}

/// An association from one resource to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationMetadata {
    /// Target resource name.
    pub target: String,

    /// Column (or document field) holding the reference. Defaults to the
    /// association name.
    #[serde(default)]
    pub local_field: Option<String>,

    /// Referenced column on the target. Backends pick their own default
    /// (`id` for SQL, `_id` for documents).
    #[serde(default)]
    pub foreign_field: Option<String>,

    /// Whether the reference may be missing (LEFT vs INNER join).
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

impl AssociationMetadata {
    /// Create an association to `target` with default fields.
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            local_field: None,
            foreign_field: None,
            nullable: true,
        }
    }

    /// Set the local reference field.
    pub fn with_local_field(mut self, field: &str) -> Self {
        self.local_field = Some(field.to_string());
        self
    }
}

/// Pagination attributes, settable on a resource or on a single operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationAttributes {
    pub enabled: Option<bool>,
    pub client_enabled: Option<bool>,
    pub client_items_per_page: Option<bool>,
    pub items_per_page: Option<u64>,
    pub maximum_items_per_page: Option<u64>,
    pub partial: Option<bool>,
    pub client_partial: Option<bool>,
}

/// Per-operation overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default)]
    pub pagination: PaginationAttributes,
}

/// Metadata for a single resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Resource name; filled from the table key when loaded from TOML.
    #[serde(skip)]
    pub name: String,

    /// Table or collection name. Defaults to the resource name.
    #[serde(default)]
    pub source: Option<String>,

    /// Mapped properties and their storage types.
    #[serde(default)]
    pub properties: BTreeMap<String, StorageType>,

    /// Associations usable in dotted property paths.
    #[serde(default)]
    pub associations: BTreeMap<String, AssociationMetadata>,

    /// Filter ids applied to this resource's collections, in order.
    #[serde(default)]
    pub filters: Vec<String>,

    /// Resource-level pagination attributes.
    #[serde(default)]
    pub pagination: PaginationAttributes,

    /// Operation-level overrides keyed by operation name.
    #[serde(default)]
    pub operations: BTreeMap<String, OperationMetadata>,
}

impl ResourceMetadata {
    /// Create metadata for `name` with no properties.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set the table or collection name.
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Map a property.
    pub fn with_property(mut self, name: &str, storage_type: StorageType) -> Self {
        self.properties.insert(name.to_string(), storage_type);
        self
    }

    /// Add an association.
    pub fn with_association(mut self, name: &str, association: AssociationMetadata) -> Self {
        self.associations.insert(name.to_string(), association);
        self
    }

    /// Attach a filter id.
    pub fn with_filter(mut self, filter_id: &str) -> Self {
        self.filters.push(filter_id.to_string());
        self
    }

    /// Replace the resource-level pagination attributes.
    pub fn with_pagination(mut self, pagination: PaginationAttributes) -> Self {
        self.pagination = pagination;
        self
    }

    /// Set pagination overrides for one operation.
    pub fn with_operation_pagination(
        mut self,
        operation: &str,
        pagination: PaginationAttributes,
    ) -> Self {
        self.operations
            .entry(operation.to_string())
            .or_default()
            .pagination = pagination;
        self
    }

    /// Table or collection name.
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Resolve a pagination attribute: operation first, then resource.
    pub fn pagination_attribute<T>(
        &self,
        operation: Option<&str>,
        pick: impl Fn(&PaginationAttributes) -> Option<T>,
    ) -> Option<T> {
        operation
            .and_then(|name| self.operations.get(name))
            .and_then(|op| pick(&op.pagination))
            .or_else(|| pick(&self.pagination))
    }
}

/// Kind of a declared filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Numeric,
}

/// A filter declaration, referenced by id from resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub kind: FilterKind,

    /// Enabled property paths; absent means every mapped property.
    #[serde(default)]
    pub properties: Option<Vec<String>>,
}

/// One association hop on a dotted property path.
#[derive(Debug, Clone)]
pub struct AssociationStep<'a> {
    /// Path up to and including this association (e.g. `relatedDummy.thirdLevel`).
    pub path: String,
    /// Association name on the owning resource.
    pub name: &'a str,
    /// Owning resource.
    pub owner: &'a ResourceMetadata,
    pub association: &'a AssociationMetadata,
    /// Resource the association points to.
    pub target: &'a ResourceMetadata,
}

/// A property path resolved against metadata.
#[derive(Debug, Clone)]
pub struct ResolvedProperty<'a> {
    /// Associations to walk, outermost first. Empty for a plain property.
    pub associations: Vec<AssociationStep<'a>>,
    /// Leaf field name on the last resource.
    pub field: String,
    pub storage_type: StorageType,
}

impl ResolvedProperty<'_> {
    /// Whether the path crosses at least one association.
    pub fn is_nested(&self) -> bool {
        !self.associations.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    resources: BTreeMap<String, ResourceMetadata>,
    #[serde(default)]
    filters: BTreeMap<String, FilterDefinition>,
}

/// All known resources and filter declarations.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    resources: BTreeMap<String, ResourceMetadata>,
    filters: BTreeMap<String, FilterDefinition>,
}

impl MetadataRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate metadata from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate metadata from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, MetadataError> {
        let document: MetadataDocument = toml::from_str(raw)?;
        let mut registry = Self {
            resources: BTreeMap::new(),
            filters: document.filters,
        };
        for (name, mut resource) in document.resources {
            resource.name = name.clone();
            registry.resources.insert(name, resource);
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Register a resource, builder style. Not validated.
    pub fn with_resource(mut self, resource: ResourceMetadata) -> Self {
        self.resources.insert(resource.name.clone(), resource);
        self
    }

    /// Declare a filter, builder style. Not validated.
    pub fn with_filter(mut self, id: &str, definition: FilterDefinition) -> Self {
        self.filters.insert(id.to_string(), definition);
        self
    }

    /// Check cross references between resources and filters.
    pub fn validate(&self) -> Result<(), MetadataError> {
        for resource in self.resources.values() {
            for (association, meta) in &resource.associations {
                if !self.resources.contains_key(&meta.target) {
                    return Err(MetadataError::UnknownAssociationTarget {
                        resource: resource.name.clone(),
                        association: association.clone(),
                        target: meta.target.clone(),
                    });
                }
            }
            for filter in &resource.filters {
                if !self.filters.contains_key(filter) {
                    return Err(MetadataError::UnknownFilter {
                        resource: resource.name.clone(),
                        filter: filter.clone(),
                    });
                }
            }
        }

        for (id, definition) in &self.filters {
            let Some(properties) = &definition.properties else {
                continue;
            };
            let users: Vec<&ResourceMetadata> = self
                .resources
                .values()
                .filter(|r| r.filters.iter().any(|f| f == id))
                .collect();
            if users.is_empty() {
                continue;
            }
            for property in properties {
                let mapped = users
                    .iter()
                    .any(|r| self.resolve_property(&r.name, property).is_some());
                if !mapped {
                    return Err(MetadataError::UnmappedFilterProperty {
                        filter: id.clone(),
                        property: property.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Look up a resource.
    pub fn resource(&self, name: &str) -> Option<&ResourceMetadata> {
        self.resources.get(name)
    }

    /// All resources, by name.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceMetadata> {
        self.resources.values()
    }

    /// Look up a filter declaration.
    pub fn filter(&self, id: &str) -> Option<&FilterDefinition> {
        self.filters.get(id)
    }

    /// All filter declarations, by id.
    pub fn filters(&self) -> impl Iterator<Item = (&String, &FilterDefinition)> {
        self.filters.iter()
    }

    /// Resolve a (possibly dotted) property path on `resource`.
    ///
    /// Returns `None` when the resource, any association hop, or the leaf
    /// property is unknown.
    pub fn resolve_property<'a>(
        &'a self,
        resource: &str,
        property: &str,
    ) -> Option<ResolvedProperty<'a>> {
        let mut current = self.resources.get(resource)?;
        let mut segments: Vec<&str> = property.split('.').collect();
        let leaf = segments.pop()?;
        if leaf.is_empty() {
            return None;
        }

        let mut associations = Vec::with_capacity(segments.len());
        let mut path = String::new();
        for segment in segments {
            let (name, association) = current.associations.get_key_value(segment)?;
            let target = self.resources.get(&association.target)?;
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(segment);
            associations.push(AssociationStep {
                path: path.clone(),
                name: name.as_str(),
                owner: current,
                association,
                target,
            });
            current = target;
        }

        let storage_type = *current.properties.get(leaf)?;
        Some(ResolvedProperty {
            associations,
            field: leaf.to_string(),
            storage_type,
        })
    }
}
