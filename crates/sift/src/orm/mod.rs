//! Relational backend: SeaQuery builders executed through a [`SqlExecutor`].
//!
//! This module provides:
//! - Orm: the [`Backend`] marker for SQL collections
//! - QueryBuilder: SeaQuery-based SQL generation with join bookkeeping
//! - EntityManager / EntityRepository: manager and repository for SQL resources
//! - PaginationExtension: LIMIT/OFFSET plus a counting paginator result
//! - SqlExecutor for `sqlx::PgPool`

mod pagination;
mod postgres;
mod query_builder;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sea_query::Values;

use crate::extension::Backend;
use crate::manager::{ObjectManager, ObjectRepository};
use crate::metadata::MetadataRegistry;

pub use pagination::PaginationExtension;
pub use postgres::create_pool;
pub use query_builder::{BoundParameter, QueryBuilder, QueryNameGenerator, ROOT_ALIAS};

/// Runs rendered SQL.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a SELECT and return every row as a JSON object.
    async fn fetch_all(&self, sql: &str, values: Values) -> Result<Vec<serde_json::Value>>;

    /// Run a `SELECT COUNT(*)` and return the count.
    async fn fetch_count(&self, sql: &str, values: Values) -> Result<u64>;
}

/// SQL backend marker.
pub struct Orm;

#[async_trait]
impl Backend for Orm {
    type Builder = QueryBuilder;

    const CAPABILITY: &'static str = "a query builder";

    fn create_builder(repository: &dyn ObjectRepository) -> Option<QueryBuilder> {
        repository.create_query_builder(ROOT_ALIAS)
    }

    async fn execute(builder: QueryBuilder) -> Result<Vec<serde_json::Value>> {
        builder.execute().await
    }
}

/// Manager for resources stored in SQL tables.
#[derive(Clone)]
pub struct EntityManager {
    metadata: Arc<MetadataRegistry>,
    executor: Arc<dyn SqlExecutor>,
}

impl EntityManager {
    pub fn new(metadata: Arc<MetadataRegistry>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self { metadata, executor }
    }
}

impl ObjectManager for EntityManager {
    fn repository(&self, resource: &str) -> Arc<dyn ObjectRepository> {
        let table = self
            .metadata
            .resource(resource)
            .map(|meta| meta.source().to_string())
            .unwrap_or_else(|| resource.to_string());
        Arc::new(EntityRepository {
            resource: resource.to_string(),
            table,
            executor: Arc::clone(&self.executor),
        })
    }
}

/// Repository for one SQL table.
pub struct EntityRepository {
    resource: String,
    table: String,
    executor: Arc<dyn SqlExecutor>,
}

impl EntityRepository {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl ObjectRepository for EntityRepository {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn create_query_builder(&self, alias: &str) -> Option<QueryBuilder> {
        Some(QueryBuilder::new(
            &self.table,
            alias,
            Arc::clone(&self.executor),
        ))
    }
}
