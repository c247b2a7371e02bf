//! Default provider wiring: the filter extension followed by the pagination
//! extension, over a registry that maps every known resource to one manager.

use std::sync::Arc;

use crate::extension::Extension;
use crate::filter::{FilterExtension, FilterLocator};
use crate::manager::{ManagerRegistry, ObjectManager, StaticManagerRegistry};
use crate::metadata::MetadataRegistry;
use crate::odm::{self, DocumentExecutor, DocumentManager, Odm};
use crate::orm::{self, EntityManager, Orm, SqlExecutor};
use crate::pagination::Pagination;
use crate::provider::CollectionDataProvider;

/// Registry mapping every resource in `metadata` to `manager`.
pub fn registry_for(
    metadata: &MetadataRegistry,
    manager: Arc<dyn ObjectManager>,
) -> StaticManagerRegistry {
    let mut registry = StaticManagerRegistry::new();
    for resource in metadata.resources() {
        registry.register(&resource.name, Arc::clone(&manager));
    }
    registry
}

/// Filters, then pagination, for SQL collections.
pub fn orm_extensions(
    metadata: &Arc<MetadataRegistry>,
    pagination: &Arc<Pagination>,
) -> Vec<Extension<Orm>> {
    vec![
        Extension::collection(FilterExtension::new(
            Arc::clone(metadata),
            Arc::new(FilterLocator::from_metadata(metadata)),
        )),
        Extension::result(orm::PaginationExtension::new(Arc::clone(pagination))),
    ]
}

/// Filters, then the `$facet` pagination, for document collections.
pub fn odm_extensions(
    metadata: &Arc<MetadataRegistry>,
    pagination: &Arc<Pagination>,
    registry: &Arc<dyn ManagerRegistry>,
) -> Vec<Extension<Odm>> {
    vec![
        Extension::collection(FilterExtension::new(
            Arc::clone(metadata),
            Arc::new(FilterLocator::from_metadata(metadata)),
        )),
        Extension::result(odm::PaginationExtension::new(
            Arc::clone(registry),
            Arc::clone(pagination),
        )),
    ]
}

/// SQL provider for every resource in `metadata`.
pub fn orm_provider(
    metadata: Arc<MetadataRegistry>,
    pagination: Arc<Pagination>,
    executor: Arc<dyn SqlExecutor>,
) -> CollectionDataProvider<Orm> {
    let manager = Arc::new(EntityManager::new(Arc::clone(&metadata), executor));
    let registry: Arc<dyn ManagerRegistry> = Arc::new(registry_for(&metadata, manager));
    CollectionDataProvider::new(registry, orm_extensions(&metadata, &pagination))
}

/// Document provider for every resource in `metadata`.
pub fn odm_provider(
    metadata: Arc<MetadataRegistry>,
    pagination: Arc<Pagination>,
    executor: Arc<dyn DocumentExecutor>,
) -> CollectionDataProvider<Odm> {
    let manager = Arc::new(DocumentManager::new(Arc::clone(&metadata), executor));
    let registry: Arc<dyn ManagerRegistry> = Arc::new(registry_for(&metadata, manager));
    let extensions = odm_extensions(&metadata, &pagination, &registry);
    CollectionDataProvider::new(registry, extensions)
}
