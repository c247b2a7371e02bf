//! Sift test utilities.
//!
//! Helpers for integration testing: resource metadata fixtures, recording
//! executors and extensions, and assertion utilities for rendered queries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sea_query::{Value, Values};
use serde_json::{Value as JsonValue, json};

use sift::context::Context;
use sift::error::ProviderResult;
use sift::extension::{Backend, CollectionExtension, ResultCollectionExtension};
use sift::manager::{ManagerRegistry, ObjectManager, ObjectRepository, StaticManagerRegistry};
use sift::metadata::{
    AssociationMetadata, FilterDefinition, FilterKind, MetadataRegistry, ResourceMetadata,
    StorageType,
};
use sift::orm::SqlExecutor;
use sift::provider::CollectionResult;

/// Id of the numeric filter declared by [`dummy_metadata`].
pub const DUMMY_NUMERIC_FILTER: &str = "dummy.numeric";

/// `Dummy` → `RelatedDummy` → `ThirdLevel`, with a numeric filter on `Dummy`.
pub fn dummy_metadata() -> MetadataRegistry {
    MetadataRegistry::new()
        .with_resource(
            ResourceMetadata::new("Dummy")
                .with_source("dummy")
                .with_property("id", StorageType::Integer)
                .with_property("price", StorageType::Decimal)
                .with_property("dummyFloat", StorageType::Float)
                .with_property("name", StorageType::String)
                .with_association(
                    "relatedDummy",
                    AssociationMetadata::new("RelatedDummy").with_local_field("related_dummy_id"),
                )
                .with_filter(DUMMY_NUMERIC_FILTER),
        )
        .with_resource(
            ResourceMetadata::new("RelatedDummy")
                .with_source("related_dummy")
                .with_property("id", StorageType::Integer)
                .with_property("age", StorageType::Integer)
                .with_association("thirdLevel", AssociationMetadata::new("ThirdLevel")),
        )
        .with_resource(
            ResourceMetadata::new("ThirdLevel")
                .with_source("third_level")
                .with_property("id", StorageType::Integer)
                .with_property("level", StorageType::Integer),
        )
        .with_filter(
            DUMMY_NUMERIC_FILTER,
            FilterDefinition {
                kind: FilterKind::Numeric,
                properties: Some(vec![
                    "id".to_string(),
                    "price".to_string(),
                    "dummyFloat".to_string(),
                    "relatedDummy.age".to_string(),
                ]),
            },
        )
}

/// `count` dummy documents with ids `1..=count`.
pub fn dummy_documents(count: u64) -> Vec<JsonValue> {
    (1..=count)
        .map(|i| {
            json!({
                "_id": i,
                "id": i,
                "name": format!("Dummy #{i}"),
                "dummyFloat": i as f64 / 2.0,
                "related_dummy_id": i % 3,
            })
        })
        .collect()
}

/// Related dummies with ids `0..count` and `age = 10 * id`.
pub fn related_documents(count: u64) -> Vec<JsonValue> {
    (0..count)
        .map(|i| json!({ "_id": i, "id": i, "age": i * 10 }))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A SQL statement seen by [`RecordingSqlExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub sql: String,
    pub values: Vec<Value>,
    pub is_count: bool,
}

/// SQL executor that records every statement and answers from canned rows.
///
/// Page queries get the rows windowed by the statement's own LIMIT/OFFSET;
/// count queries get the number of rows.
#[derive(Debug, Default)]
pub struct RecordingSqlExecutor {
    rows: Vec<JsonValue>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl RecordingSqlExecutor {
    pub fn new(rows: Vec<JsonValue>) -> Self {
        Self {
            rows,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Statements executed so far.
    pub fn queries(&self) -> Vec<RecordedQuery> {
        lock(&self.queries).clone()
    }

    /// Page queries executed so far.
    pub fn page_queries(&self) -> Vec<RecordedQuery> {
        self.queries().into_iter().filter(|q| !q.is_count).collect()
    }

    /// Count queries executed so far.
    pub fn count_queries(&self) -> Vec<RecordedQuery> {
        self.queries().into_iter().filter(|q| q.is_count).collect()
    }

    fn record(&self, sql: &str, values: &Values, is_count: bool) {
        lock(&self.queries).push(RecordedQuery {
            sql: sql.to_string(),
            values: values.0.clone(),
            is_count,
        });
    }
}

/// Value bound to the `$n` placeholder following `keyword`, if any.
fn placeholder_value(sql: &str, values: &Values, keyword: &str) -> Option<u64> {
    let rest = &sql[sql.find(keyword)? + keyword.len()..];
    let digits: String = rest
        .trim_start()
        .strip_prefix('$')?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let index: usize = digits.parse().ok()?;
    match values.0.get(index.checked_sub(1)?)? {
        Value::BigUnsigned(Some(n)) => Some(*n),
        Value::BigInt(Some(n)) => u64::try_from(*n).ok(),
        Value::Int(Some(n)) => u64::try_from(*n).ok(),
        _ => None,
    }
}

#[async_trait]
impl SqlExecutor for RecordingSqlExecutor {
    async fn fetch_all(&self, sql: &str, values: Values) -> anyhow::Result<Vec<JsonValue>> {
        self.record(sql, &values, false);
        let offset = placeholder_value(sql, &values, "OFFSET").unwrap_or(0) as usize;
        let rows = self.rows.iter().skip(offset);
        Ok(match placeholder_value(sql, &values, "LIMIT") {
            Some(limit) => rows.take(limit as usize).cloned().collect(),
            None => rows.cloned().collect(),
        })
    }

    async fn fetch_count(&self, sql: &str, values: Values) -> anyhow::Result<u64> {
        self.record(sql, &values, true);
        Ok(self.rows.len() as u64)
    }
}

/// Repository that cannot create any builder.
pub struct InertRepository {
    resource: String,
}

impl ObjectRepository for InertRepository {
    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Manager whose repositories lack every builder capability.
pub struct InertManager;

impl ObjectManager for InertManager {
    fn repository(&self, resource: &str) -> Arc<dyn ObjectRepository> {
        Arc::new(InertRepository {
            resource: resource.to_string(),
        })
    }
}

/// Registry with [`InertManager`] for `resource`.
pub fn inert_registry(resource: &str) -> Arc<dyn ManagerRegistry> {
    let registry = StaticManagerRegistry::new().with_manager(resource, Arc::new(InertManager));
    Arc::new(registry)
}

/// Shared log of extension calls, e.g. `"first:apply"`, `"second:get_result"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Read a call log.
pub fn calls(log: &CallLog) -> Vec<String> {
    lock(log).clone()
}

/// Extension that records its calls and, when it supports the result,
/// answers with a single `{ "stage": name }` item.
pub struct RecordingExtension {
    name: String,
    supports: bool,
    log: CallLog,
}

impl RecordingExtension {
    pub fn new(name: &str, supports: bool, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            supports,
            log: Arc::clone(log),
        }
    }

    fn push(&self, call: &str) {
        lock(&self.log).push(format!("{}:{call}", self.name));
    }
}

impl<B: Backend> CollectionExtension<B> for RecordingExtension {
    fn apply_to_collection(
        &self,
        _builder: &mut B::Builder,
        _resource: &str,
        _operation: Option<&str>,
        context: &mut Context,
    ) -> ProviderResult<()> {
        self.push("apply");
        context.insert(format!("seen:{}", self.name), JsonValue::Bool(true));
        Ok(())
    }
}

#[async_trait]
impl<B: Backend> ResultCollectionExtension<B> for RecordingExtension {
    fn supports_result(
        &self,
        _resource: &str,
        _operation: Option<&str>,
        _context: &Context,
    ) -> bool {
        self.push("supports_result");
        self.supports
    }

    async fn get_result(
        &self,
        _builder: B::Builder,
        _resource: &str,
        _operation: Option<&str>,
        _context: &Context,
    ) -> ProviderResult<CollectionResult> {
        self.push("get_result");
        Ok(CollectionResult::Items(vec![json!({ "stage": self.name })]))
    }
}

/// Assertion helpers for rendered queries.
pub mod assert {
    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dummy_metadata_is_consistent() {
        let metadata = dummy_metadata();
        assert!(metadata.validate().is_ok());
        let age = metadata.resolve_property("Dummy", "relatedDummy.age");
        assert!(age.is_some());
    }

    #[test]
    fn dummy_documents_are_numbered() {
        let docs = dummy_documents(3);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["_id"], 1);
        assert_eq!(docs[2]["name"], "Dummy #3");
    }

    #[test]
    fn reads_limit_and_offset_placeholders() {
        let values = Values(vec![
            Value::Int(Some(12)),
            Value::BigUnsigned(Some(10)),
            Value::BigUnsigned(Some(20)),
        ]);
        let sql = "SELECT * FROM \"dummy\" WHERE \"id\" = $1 LIMIT $2 OFFSET $3";
        assert_eq!(placeholder_value(sql, &values, "LIMIT"), Some(10));
        assert_eq!(placeholder_value(sql, &values, "OFFSET"), Some(20));
        assert_eq!(placeholder_value("SELECT 1", &values, "LIMIT"), None);
    }

    #[test]
    fn test_assertions() {
        assert::contains("hello world", "world");
        assert::not_contains("hello world", "foo");
    }
}
