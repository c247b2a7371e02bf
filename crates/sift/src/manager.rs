//! Manager registry, managers and repositories.
//!
//! The registry maps a resource to the manager that persists it; the manager
//! hands out a repository per resource; the repository constructs empty
//! builders. Builder construction is a capability: a repository exposes it by
//! overriding the matching `create_*` method, and the default `None` means the
//! capability is absent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::odm::AggregationBuilder;
use crate::orm::QueryBuilder;

/// Repository for one resource.
pub trait ObjectRepository: Send + Sync {
    /// Resource this repository serves.
    fn resource(&self) -> &str;

    /// Create an empty SQL query builder whose root is aliased `alias`.
    fn create_query_builder(&self, alias: &str) -> Option<QueryBuilder> {
        let _ = alias;
        None
    }

    /// Create an empty aggregation builder.
    fn create_aggregation_builder(&self) -> Option<AggregationBuilder> {
        None
    }
}

/// Persistence manager for a group of resources.
pub trait ObjectManager: Send + Sync {
    /// Repository for `resource`.
    fn repository(&self, resource: &str) -> Arc<dyn ObjectRepository>;
}

/// Resolves resources to managers.
pub trait ManagerRegistry: Send + Sync {
    /// Manager persisting `resource`, if any.
    fn manager_for(&self, resource: &str) -> Option<Arc<dyn ObjectManager>>;
}

/// Registry backed by a fixed resource → manager map.
#[derive(Default, Clone)]
pub struct StaticManagerRegistry {
    managers: HashMap<String, Arc<dyn ObjectManager>>,
}

impl StaticManagerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `manager` for `resource`, builder style.
    pub fn with_manager(mut self, resource: &str, manager: Arc<dyn ObjectManager>) -> Self {
        self.register(resource, manager);
        self
    }

    /// Register `manager` for `resource`, replacing any previous one.
    pub fn register(&mut self, resource: &str, manager: Arc<dyn ObjectManager>) {
        self.managers.insert(resource.to_string(), manager);
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl ManagerRegistry for StaticManagerRegistry {
    fn manager_for(&self, resource: &str) -> Option<Arc<dyn ObjectManager>> {
        self.managers.get(resource).cloned()
    }
}
