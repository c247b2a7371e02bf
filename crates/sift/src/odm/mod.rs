//! Document backend: aggregation pipelines executed through a
//! [`DocumentExecutor`].
//!
//! Stages are typed ([`Stage`]) while the builder is open and rendered to
//! MongoDB-style JSON documents when the pipeline is handed to an executor.

mod memory;
mod pagination;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::extension::Backend;
use crate::manager::{ObjectManager, ObjectRepository};
use crate::metadata::{MetadataRegistry, ResolvedProperty, StorageType};

pub use memory::MemoryDocumentStore;
pub use pagination::PaginationExtension;

/// Foreign field joined against when an association names none.
pub const DEFAULT_FOREIGN_FIELD: &str = "_id";

/// Runs aggregation pipelines.
#[async_trait]
pub trait DocumentExecutor: Send + Sync {
    /// Run `pipeline` against `collection` and return the output documents.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> Result<Vec<Value>>;
}

/// Constraint carried by a `$match` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCondition {
    Equals {
        value: Value,
        storage_type: StorageType,
    },
    In {
        values: Vec<Value>,
        storage_type: StorageType,
    },
}

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match {
        field: String,
        condition: MatchCondition,
    },
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        alias: String,
    },
    Unwind {
        path: String,
    },
    Skip(u64),
    Limit(u64),
    /// `$count` into the named field.
    Count(String),
    /// Named sub-pipelines run over the same input.
    Facet(Vec<(String, Vec<Stage>)>),
}

impl Stage {
    /// Render as a pipeline document.
    pub fn to_document(&self) -> Value {
        match self {
            Stage::Match { field, condition } => {
                let predicate = match condition {
                    MatchCondition::Equals { value, .. } => value.clone(),
                    MatchCondition::In { values, .. } => json!({ "$in": values }),
                };
                let mut body = Map::new();
                body.insert(field.clone(), predicate);
                json!({ "$match": body })
            }
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                alias,
            } => json!({
                "$lookup": {
                    "from": from,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": alias,
                }
            }),
            Stage::Unwind { path } => json!({ "$unwind": format!("${path}") }),
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Count(field) => json!({ "$count": field }),
            Stage::Facet(branches) => {
                let mut body = Map::new();
                for (name, stages) in branches {
                    body.insert(
                        name.clone(),
                        Value::Array(stages.iter().map(Stage::to_document).collect()),
                    );
                }
                json!({ "$facet": body })
            }
        }
    }
}

/// Aggregation pipeline under construction for one collection.
pub struct AggregationBuilder {
    collection: String,
    stages: Vec<Stage>,
    lookups: HashMap<String, String>,
    executor: Arc<dyn DocumentExecutor>,
}

impl AggregationBuilder {
    pub fn new(collection: &str, executor: Arc<dyn DocumentExecutor>) -> Self {
        Self {
            collection: collection.to_string(),
            stages: Vec::new(),
            lookups: HashMap::new(),
            executor,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stages appended so far.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }

    /// Alias established for a lookup path, if any.
    pub fn lookup_alias(&self, path: &str) -> Option<&str> {
        self.lookups.get(path).map(String::as_str)
    }

    pub fn add_stage(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn match_equals(
        &mut self,
        field: &str,
        value: Value,
        storage_type: StorageType,
    ) -> &mut Self {
        self.add_stage(Stage::Match {
            field: field.to_string(),
            condition: MatchCondition::Equals {
                value,
                storage_type,
            },
        })
    }

    pub fn match_in(
        &mut self,
        field: &str,
        values: Vec<Value>,
        storage_type: StorageType,
    ) -> &mut Self {
        self.add_stage(Stage::Match {
            field: field.to_string(),
            condition: MatchCondition::In {
                values,
                storage_type,
            },
        })
    }

    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.add_stage(Stage::Skip(n))
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.add_stage(Stage::Limit(n))
    }

    pub fn count(&mut self, field: &str) -> &mut Self {
        self.add_stage(Stage::Count(field.to_string()))
    }

    pub fn facet(&mut self, branches: Vec<(String, Vec<Stage>)>) -> &mut Self {
        self.add_stage(Stage::Facet(branches))
    }

    /// Add `$lookup` + `$unwind` for every association on the path and return
    /// the field name to match the leaf against.
    ///
    /// Lookups already added for a path prefix are reused.
    pub fn lookup_property_path(&mut self, property: &ResolvedProperty<'_>) -> String {
        let mut prefix = String::new();
        for step in &property.associations {
            let alias = match self.lookups.get(&step.path) {
                Some(existing) => existing.clone(),
                None => {
                    let association = step.association;
                    let local = association.local_field.as_deref().unwrap_or(step.name);
                    let alias = format!("{prefix}{}_lkup", step.name);
                    self.add_stage(Stage::Lookup {
                        from: step.target.source().to_string(),
                        local_field: format!("{prefix}{local}"),
                        foreign_field: association
                            .foreign_field
                            .clone()
                            .unwrap_or_else(|| DEFAULT_FOREIGN_FIELD.to_string()),
                        alias: alias.clone(),
                    });
                    self.add_stage(Stage::Unwind {
                        path: alias.clone(),
                    });
                    self.lookups.insert(step.path.clone(), alias.clone());
                    alias
                }
            };
            prefix = format!("{alias}.");
        }
        format!("{prefix}{}", property.field)
    }

    /// The pipeline as JSON documents.
    pub fn pipeline(&self) -> Vec<Value> {
        self.stages.iter().map(Stage::to_document).collect()
    }

    /// Run the pipeline.
    pub async fn execute(&self) -> Result<Vec<Value>> {
        self.executor
            .aggregate(&self.collection, self.pipeline())
            .await
    }
}

/// Document backend marker.
pub struct Odm;

#[async_trait]
impl Backend for Odm {
    type Builder = AggregationBuilder;

    const CAPABILITY: &'static str = "an aggregation builder";

    fn create_builder(repository: &dyn ObjectRepository) -> Option<AggregationBuilder> {
        repository.create_aggregation_builder()
    }

    async fn execute(builder: AggregationBuilder) -> Result<Vec<Value>> {
        builder.execute().await
    }
}

/// Manager for resources stored as document collections.
#[derive(Clone)]
pub struct DocumentManager {
    metadata: Arc<MetadataRegistry>,
    executor: Arc<dyn DocumentExecutor>,
}

impl DocumentManager {
    pub fn new(metadata: Arc<MetadataRegistry>, executor: Arc<dyn DocumentExecutor>) -> Self {
        Self { metadata, executor }
    }
}

impl ObjectManager for DocumentManager {
    fn repository(&self, resource: &str) -> Arc<dyn ObjectRepository> {
        let collection = self
            .metadata
            .resource(resource)
            .map(|meta| meta.source().to_string())
            .unwrap_or_else(|| resource.to_string());
        Arc::new(DocumentRepository {
            resource: resource.to_string(),
            collection,
            executor: Arc::clone(&self.executor),
        })
    }
}

/// Repository for one document collection.
pub struct DocumentRepository {
    resource: String,
    collection: String,
    executor: Arc<dyn DocumentExecutor>,
}

impl DocumentRepository {
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl ObjectRepository for DocumentRepository {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn create_aggregation_builder(&self) -> Option<AggregationBuilder> {
        Some(AggregationBuilder::new(&self.collection, Arc::clone(&self.executor)))
    }
}
