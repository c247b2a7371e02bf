//! Collection extension protocol.
//!
//! A provider holds an ordered list of [`Extension`]s. Every extension gets
//! `apply_to_collection` on each request, in order. Result-capable extensions
//! are then asked, in the same order, whether they produce the result; the
//! first one that says yes supplies it and normal execution is skipped.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::ProviderResult;
use crate::manager::ObjectRepository;
use crate::provider::CollectionResult;

/// A persistence backend: the builder type its repositories construct and
/// how a finished builder is executed by default.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Query or aggregation builder for this backend.
    type Builder: Send + 'static;

    /// Human-readable name of the repository capability, used in errors.
    const CAPABILITY: &'static str;

    /// Ask a repository for a fresh builder. `None` means the repository
    /// lacks the capability.
    fn create_builder(repository: &dyn ObjectRepository) -> Option<Self::Builder>;

    /// Execute the builder and materialize every row or document.
    async fn execute(builder: Self::Builder) -> anyhow::Result<Vec<serde_json::Value>>;
}

/// A pipeline stage that mutates the builder.
pub trait CollectionExtension<B: Backend>: Send + Sync {
    fn apply_to_collection(
        &self,
        builder: &mut B::Builder,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()>;
}

/// A pipeline stage that can also supply the final result.
#[async_trait]
pub trait ResultCollectionExtension<B: Backend>: CollectionExtension<B> {
    /// Whether this extension produces the result for this request.
    fn supports_result(&self, resource: &str, operation: Option<&str>, context: &Context) -> bool;

    /// Produce the result from the fully built builder.
    async fn get_result(
        &self,
        builder: B::Builder,
        resource: &str,
        operation: Option<&str>,
        context: &Context,
    ) -> ProviderResult<CollectionResult>;
}

/// One configured pipeline stage.
pub enum Extension<B: Backend> {
    /// Mutates the builder only.
    Collection(Arc<dyn CollectionExtension<B>>),
    /// Mutates the builder and may supply the result.
    Result(Arc<dyn ResultCollectionExtension<B>>),
}

impl<B: Backend> Clone for Extension<B> {
    fn clone(&self) -> Self {
        match self {
            Extension::Collection(e) => Extension::Collection(Arc::clone(e)),
            Extension::Result(e) => Extension::Result(Arc::clone(e)),
        }
    }
}

impl<B: Backend> Extension<B> {
    /// Wrap a builder-only extension.
    pub fn collection(extension: impl CollectionExtension<B> + 'static) -> Self {
        Extension::Collection(Arc::new(extension))
    }

    /// Wrap a result-capable extension.
    pub fn result(extension: impl ResultCollectionExtension<B> + 'static) -> Self {
        Extension::Result(Arc::new(extension))
    }

    /// Run this stage against the builder.
    pub fn apply_to_collection(
        &self,
        builder: &mut B::Builder,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()> {
        match self {
            Extension::Collection(e) => {
                e.apply_to_collection(builder, resource, operation, context)
            }
            Extension::Result(e) => e.apply_to_collection(builder, resource, operation, context),
        }
    }

    /// The result-capable view of this stage, if it has one.
    pub fn as_result(&self) -> Option<&dyn ResultCollectionExtension<B>> {
        match self {
            Extension::Collection(_) => None,
            Extension::Result(e) => Some(e.as_ref()),
        }
    }
}
