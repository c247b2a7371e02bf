//! Paginates aggregation pipelines with a single `$facet` round trip.
//!
//! The page and the total count are computed by two sub-pipelines of one
//! `$facet` stage:
//!
//! ```text
//! { "$facet": {
//!     "results": [ { "$skip": offset }, { "$limit": limit } ],
//!     "count":   [ { "$count": "count" } ]
//! } }
//! ```
//!
//! The executed pipeline yields one document shaped like the facet, from
//! which the [`Paginator`] is assembled.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{AggregationBuilder, Odm, Stage};
use crate::context::Context;
use crate::error::{ProviderError, ProviderResult};
use crate::extension::{Backend, CollectionExtension, ResultCollectionExtension};
use crate::manager::ManagerRegistry;
use crate::metadata::StorageType;
use crate::pagination::{Pagination, Paginator};
use crate::provider::CollectionResult;

pub const RESULTS_FACET: &str = "results";
pub const COUNT_FACET: &str = "count";
const COUNT_FIELD: &str = "count";

/// `$limit: 0` is rejected by document stores, so an empty page is produced
/// by matching a field no document carries.
const LIMIT_ZERO_MARKER: &str = "__sift_limit_zero_marker";

pub struct PaginationExtension {
    registry: Arc<dyn ManagerRegistry>,
    pagination: Arc<Pagination>,
}

impl PaginationExtension {
    pub fn new(registry: Arc<dyn ManagerRegistry>, pagination: Arc<Pagination>) -> Self {
        Self {
            registry,
            pagination,
        }
    }

    fn sub_pipeline(&self, resource: &str) -> ProviderResult<AggregationBuilder> {
        let manager = self
            .registry
            .manager_for(resource)
            .ok_or_else(|| ProviderError::NoManager {
                resource: resource.to_string(),
            })?;
        let repository = manager.repository(resource);
        Odm::create_builder(repository.as_ref())
            .ok_or_else(|| ProviderError::missing_capability(resource, Odm::CAPABILITY))
    }
}

impl CollectionExtension<Odm> for PaginationExtension {
    fn apply_to_collection(
        &self,
        builder: &mut AggregationBuilder,
        resource: &str,
        operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()> {
        if !self.pagination.is_enabled(resource, operation, context) {
            return Ok(());
        }
        let window = self.pagination.get_pagination(resource, operation, context);

        let mut results = self.sub_pipeline(resource)?;
        results.skip(window.offset);
        if window.limit == 0 {
            results.match_equals(
                LIMIT_ZERO_MARKER,
                Value::String(LIMIT_ZERO_MARKER.to_string()),
                StorageType::String,
            );
        } else {
            results.limit(window.limit);
        }

        let mut branches = vec![(RESULTS_FACET.to_string(), results.into_stages())];
        if window.count_total {
            let mut count = self.sub_pipeline(resource)?;
            count.count(COUNT_FIELD);
            branches.push((COUNT_FACET.to_string(), count.into_stages()));
        }
        builder.facet(branches);

        debug!(
            resource,
            offset = window.offset,
            limit = window.limit,
            count_total = window.count_total,
            "pagination facet applied"
        );
        Ok(())
    }
}

#[async_trait]
impl ResultCollectionExtension<Odm> for PaginationExtension {
    fn supports_result(&self, resource: &str, operation: Option<&str>, context: &Context) -> bool {
        self.pagination.is_enabled(resource, operation, context)
    }

    async fn get_result(
        &self,
        builder: AggregationBuilder,
        resource: &str,
        _operation: Option<&str>,
        _context: &Context,
    ) -> ProviderResult<CollectionResult> {
        let (offset, limit, counted) = facet_window(builder.stages())
            .ok_or_else(|| ProviderError::malformed(resource, "$facet stage was not applied"))?;

        let documents = builder.execute().await?;
        let output = match documents.as_slice() {
            [] => None,
            [output] => Some(output),
            _ => {
                return Err(ProviderError::malformed(
                    resource,
                    "$facet produced more than one document",
                ));
            }
        };

        let items = match output.map(|doc| doc.get(RESULTS_FACET)) {
            None => Vec::new(),
            Some(Some(Value::Array(items))) => items.clone(),
            Some(_) => {
                return Err(ProviderError::malformed(
                    resource,
                    "\"results\" facet is missing or not an array",
                ));
            }
        };

        let total = if counted {
            Some(read_count(output).ok_or_else(|| {
                ProviderError::malformed(resource, "\"count\" facet is missing or not a number")
            })?)
        } else {
            None
        };

        Ok(CollectionResult::Paginated(Paginator::new(items, offset, limit, total)))
    }
}

/// Offset, limit and whether a count branch exists, read from the last
/// `$facet` stage carrying a `results` branch.
fn facet_window(stages: &[Stage]) -> Option<(u64, u64, bool)> {
    stages.iter().rev().find_map(|stage| {
        let Stage::Facet(branches) = stage else {
            return None;
        };
        let (_, results) = branches.iter().find(|(name, _)| name == RESULTS_FACET)?;
        let offset = results
            .iter()
            .find_map(|s| match s {
                Stage::Skip(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);
        let limit = results
            .iter()
            .find_map(|s| match s {
                Stage::Limit(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);
        let counted = branches.iter().any(|(name, _)| name == COUNT_FACET);
        Some((offset, limit, counted))
    })
}

/// `count[0].count`, or zero when nothing matched.
fn read_count(output: Option<&Value>) -> Option<u64> {
    let Some(output) = output else {
        return Some(0);
    };
    let counts = output.get(COUNT_FACET)?.as_array()?;
    match counts.first() {
        None => Some(0),
        Some(first) => first.get(COUNT_FIELD)?.as_u64(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_window_from_last_facet() {
        let stages = vec![
            Stage::Skip(3),
            Stage::Facet(vec![
                (
                    RESULTS_FACET.to_string(),
                    vec![Stage::Skip(20), Stage::Limit(10)],
                ),
                (
                    COUNT_FACET.to_string(),
                    vec![Stage::Count(COUNT_FIELD.to_string())],
                ),
            ]),
        ];
        assert_eq!(facet_window(&stages), Some((20, 10, true)));
    }

    #[test]
    fn missing_facet_has_no_window() {
        assert_eq!(facet_window(&[Stage::Skip(3), Stage::Limit(2)]), None);
    }

    #[test]
    fn limit_zero_window() {
        let stages = vec![Stage::Facet(vec![(
            RESULTS_FACET.to_string(),
            vec![Stage::Skip(0)],
        )])];
        assert_eq!(facet_window(&stages), Some((0, 0, false)));
    }

    #[test]
    fn count_defaults_to_zero() {
        assert_eq!(read_count(None), Some(0));
        assert_eq!(read_count(Some(&json!({ "count": [] }))), Some(0));
        assert_eq!(
            read_count(Some(&json!({ "count": [{ "count": 25 }] }))),
            Some(25)
        );
        assert_eq!(read_count(Some(&json!({ "results": [] }))), None);
    }
}
