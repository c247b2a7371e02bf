//! Collection data provider: builds, extends and executes a collection query.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::error::{ProviderError, ProviderResult};
use crate::extension::{Backend, Extension};
use crate::manager::{ManagerRegistry, ObjectRepository};
use crate::pagination::Paginator;

/// Output of a collection request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CollectionResult {
    /// Every matching row or document, from default execution.
    Items(Vec<serde_json::Value>),
    /// A page produced by a paginating extension.
    Paginated(Paginator),
}

impl CollectionResult {
    /// Items in this result.
    pub fn items(&self) -> &[serde_json::Value] {
        match self {
            CollectionResult::Items(items) => items,
            CollectionResult::Paginated(paginator) => paginator.items(),
        }
    }

    /// The paginator, if an extension produced one.
    pub fn paginator(&self) -> Option<&Paginator> {
        match self {
            CollectionResult::Items(_) => None,
            CollectionResult::Paginated(paginator) => Some(paginator),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// Orchestrates the extension pipeline for one backend.
pub struct CollectionDataProvider<B: Backend> {
    registry: Arc<dyn ManagerRegistry>,
    extensions: Vec<Extension<B>>,
}

impl<B: Backend> CollectionDataProvider<B> {
    /// Create a provider. Extensions run in the given order.
    pub fn new(registry: Arc<dyn ManagerRegistry>, extensions: Vec<Extension<B>>) -> Self {
        Self {
            registry,
            extensions,
        }
    }

    /// Configured extensions, in order.
    pub fn extensions(&self) -> &[Extension<B>] {
        &self.extensions
    }

    /// Whether this provider handles `resource`.
    ///
    /// `Ok(false)` when no manager is registered. A manager whose repository
    /// can't create this backend's builder is a configuration error.
    pub fn supports(&self, resource: &str, _operation: Option<&str>) -> ProviderResult<bool> {
        let Some(manager) = self.registry.manager_for(resource) else {
            return Ok(false);
        };
        let repository = manager.repository(resource);
        Self::create_builder(repository.as_ref(), resource)?;
        Ok(true)
    }

    fn create_builder(
        repository: &dyn ObjectRepository,
        resource: &str,
    ) -> ProviderResult<B::Builder> {
        B::create_builder(repository)
            .ok_or_else(|| ProviderError::missing_capability(resource, B::CAPABILITY))
    }

    /// Create the builder for `resource` and apply every extension to it,
    /// in order.
    pub fn build(
        &self,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<B::Builder> {
        let manager = self
            .registry
            .manager_for(resource)
            .ok_or_else(|| ProviderError::NoManager {
                resource: resource.to_string(),
            })?;
        let repository = manager.repository(resource);
        let mut builder = Self::create_builder(repository.as_ref(), resource)?;

        for extension in &self.extensions {
            extension.apply_to_collection(&mut builder, resource, operation, context)?;
        }
        Ok(builder)
    }

    /// Produce the collection for `resource`.
    ///
    /// Every extension is applied in order; the first result-capable
    /// extension that supports the request supplies the result, otherwise
    /// the builder is executed and all rows are returned.
    pub async fn get_collection(
        &self,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<CollectionResult> {
        let builder = self.build(resource, operation, context)?;

        for (position, extension) in self
            .extensions
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_result().map(|r| (i, r)))
        {
            if extension.supports_result(resource, operation, context) {
                debug!(
                    resource,
                    operation = operation.unwrap_or("default"),
                    position,
                    "extension supplies collection result"
                );
                return extension
                    .get_result(builder, resource, operation, context)
                    .await;
            }
        }

        let items = B::execute(builder).await?;
        debug!(resource, count = items.len(), "collection executed");
        Ok(CollectionResult::Items(items))
    }
}
