//! Applies pagination to SQL collections when enabled.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Orm, QueryBuilder};
use crate::context::Context;
use crate::error::ProviderResult;
use crate::extension::{CollectionExtension, ResultCollectionExtension};
use crate::pagination::{Pagination, Paginator};
use crate::provider::CollectionResult;

/// Sets LIMIT/OFFSET and, as the result extension, runs the page and count
/// queries into a [`Paginator`].
pub struct PaginationExtension {
    pagination: Arc<Pagination>,
}

impl PaginationExtension {
    pub fn new(pagination: Arc<Pagination>) -> Self {
        Self { pagination }
    }
}

impl CollectionExtension<Orm> for PaginationExtension {
    fn apply_to_collection(
        &self,
        builder: &mut QueryBuilder,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()> {
        if !self.pagination.is_enabled(resource, operation, context) {
            return Ok(());
        }

        let window = self.pagination.get_pagination(resource, operation, context);
        builder
            .set_first_result(window.offset)
            .set_max_results(window.limit);
        debug!(
            resource,
            offset = window.offset,
            limit = window.limit,
            "pagination applied"
        );
        Ok(())
    }
}

#[async_trait]
impl ResultCollectionExtension<Orm> for PaginationExtension {
    fn supports_result(&self, resource: &str, operation: Option<&str>, context: &Context) -> bool {
        self.pagination.is_enabled(resource, operation, context)
    }

    async fn get_result(
        &self,
        builder: QueryBuilder,
        resource: &str,
        operation: Option<&str>,
        context: &Context,
    ) -> ProviderResult<CollectionResult> {
        let window = self.pagination.get_pagination(resource, operation, context);
        let offset = builder.first_result().unwrap_or(window.offset);
        let limit = builder.max_results().unwrap_or(window.limit);

        let total = if window.count_total {
            Some(builder.count().await?)
        } else {
            None
        };
        let items = builder.execute().await?;

        Ok(CollectionResult::Paginated(Paginator::new(
            items, offset, limit, total,
        )))
    }
}
