//! Request filters and the extension that applies them.
//!
//! A filter reads request parameters from the [`Context`] and appends at most
//! one constraint per recognized property. Anything it does not recognize is
//! skipped without error.

mod numeric;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::context::Context;
use crate::error::ProviderResult;
use crate::extension::{Backend, CollectionExtension};
use crate::metadata::{FilterKind, MetadataRegistry, ResolvedProperty};

pub use numeric::{
    DOCUMENT_NUMERIC_TYPES, NumericFilter, NumericValue, RELATIONAL_NUMERIC_TYPES, parse_numeric,
    semantic_type,
};

/// Documentation entry for one accepted request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterDescription {
    pub property: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    pub is_collection: bool,
}

/// A filter over one backend's builder.
pub trait Filter<B: Backend>: Send + Sync {
    /// Append constraints for the request parameters this filter recognizes.
    fn apply(
        &self,
        builder: &mut B::Builder,
        resource: &str,
        operation: Option<&str>,
        context: &Context,
    ) -> ProviderResult<()>;

    /// Parameters accepted on `resource`, keyed by parameter name.
    fn description(&self, resource: &str) -> BTreeMap<String, FilterDescription>;
}

/// Property selection shared by property-based filters.
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    metadata: Arc<MetadataRegistry>,
    properties: Option<Vec<String>>,
}

impl PropertyFilter {
    /// `None` enables every non-nested mapped property.
    pub fn new(metadata: Arc<MetadataRegistry>, properties: Option<Vec<String>>) -> Self {
        Self {
            metadata,
            properties,
        }
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    /// Whether this filter is configured for `property`.
    pub fn is_property_enabled(&self, property: &str) -> bool {
        match &self.properties {
            Some(properties) => properties.iter().any(|p| p == property),
            None => !property.contains('.'),
        }
    }

    /// Resolve `property` on `resource`, `None` if it is not mapped.
    pub fn resolve(&self, resource: &str, property: &str) -> Option<ResolvedProperty<'_>> {
        self.metadata.resolve_property(resource, property)
    }

    /// Properties this filter may act on for `resource`.
    pub fn enabled_properties(&self, resource: &str) -> Vec<String> {
        match &self.properties {
            Some(properties) => properties.clone(),
            None => self
                .metadata
                .resource(resource)
                .map(|meta| meta.properties.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

/// Filters by id.
pub struct FilterLocator<B: Backend> {
    filters: HashMap<String, Arc<dyn Filter<B>>>,
}

impl<B: Backend> Default for FilterLocator<B> {
    fn default() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }
}

impl<B: Backend> FilterLocator<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every filter declared in `metadata`.
    pub fn from_metadata(metadata: &Arc<MetadataRegistry>) -> Self
    where
        NumericFilter: Filter<B>,
    {
        let mut locator = Self::new();
        for (id, definition) in metadata.filters() {
            match definition.kind {
                FilterKind::Numeric => locator.register(
                    id,
                    Arc::new(NumericFilter::new(
                        Arc::clone(metadata),
                        definition.properties.clone(),
                    )),
                ),
            }
        }
        locator
    }

    /// Register `filter` under `id`, builder style.
    pub fn with_filter(mut self, id: &str, filter: Arc<dyn Filter<B>>) -> Self {
        self.register(id, filter);
        self
    }

    pub fn register(&mut self, id: &str, filter: Arc<dyn Filter<B>>) {
        self.filters.insert(id.to_string(), filter);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Filter<B>>> {
        self.filters.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.filters.contains_key(id)
    }
}

/// Applies the filters configured on the resource, in declaration order.
pub struct FilterExtension<B: Backend> {
    metadata: Arc<MetadataRegistry>,
    filters: Arc<FilterLocator<B>>,
}

impl<B: Backend> FilterExtension<B> {
    pub fn new(metadata: Arc<MetadataRegistry>, filters: Arc<FilterLocator<B>>) -> Self {
        Self { metadata, filters }
    }
}

impl<B: Backend> CollectionExtension<B> for FilterExtension<B> {
    fn apply_to_collection(
        &self,
        builder: &mut B::Builder,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()> {
        let Some(meta) = self.metadata.resource(resource) else {
            return Ok(());
        };

        for id in &meta.filters {
            match self.filters.get(id) {
                Some(filter) => filter.apply(builder, resource, operation, context)?,
                None => warn!(resource, filter = %id, "filter is not registered, skipping"),
            }
        }
        Ok(())
    }
}
