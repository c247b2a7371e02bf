#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Collection data provider integration tests.
//!
//! Manager resolution, builder capability, extension ordering and the
//! first-supporter-wins result selection.

use std::sync::{Arc, Mutex};

use serde_json::json;
use sift::extension::Extension;
use sift::manager::{ManagerRegistry, StaticManagerRegistry};
use sift::odm::{MemoryDocumentStore, Odm};
use sift::orm::{EntityManager, Orm};
use sift::pipeline::registry_for;
use sift::{CollectionDataProvider, CollectionResult, Context, ProviderError};
use sift_test_utils::{
    CallLog, RecordingExtension, RecordingSqlExecutor, calls, dummy_documents, dummy_metadata,
    inert_registry,
};

fn orm_registry(executor: Arc<RecordingSqlExecutor>) -> Arc<dyn ManagerRegistry> {
    let metadata = Arc::new(dummy_metadata());
    let manager = Arc::new(EntityManager::new(Arc::clone(&metadata), executor));
    Arc::new(registry_for(&metadata, manager))
}

fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

// -------------------------------------------------------------------------
// Manager resolution
// -------------------------------------------------------------------------

#[tokio::test]
async fn resource_without_manager_is_not_supported() {
    let provider: CollectionDataProvider<Orm> =
        CollectionDataProvider::new(Arc::new(StaticManagerRegistry::new()), Vec::new());

    assert!(!provider.supports("Dummy", None).unwrap());

    let err = provider
        .get_collection("Dummy", None, &mut Context::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NoManager { ref resource } if resource == "Dummy"));
}

#[test]
fn registered_resource_is_supported() {
    let provider: CollectionDataProvider<Orm> = CollectionDataProvider::new(
        orm_registry(Arc::new(RecordingSqlExecutor::default())),
        Vec::new(),
    );
    assert!(provider.supports("Dummy", None).unwrap());
    assert!(provider.supports("RelatedDummy", Some("get")).unwrap());
    assert!(!provider.supports("Unknown", None).unwrap());
}

// -------------------------------------------------------------------------
// Builder capability
// -------------------------------------------------------------------------

#[test]
fn missing_query_builder_is_a_configuration_error() {
    let provider: CollectionDataProvider<Orm> =
        CollectionDataProvider::new(inert_registry("Dummy"), Vec::new());

    let err = provider.supports("Dummy", None).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Dummy"), "{message}");
    assert!(message.contains("a query builder"), "{message}");
}

#[tokio::test]
async fn missing_aggregation_builder_is_a_configuration_error() {
    let log = new_log();
    let provider: CollectionDataProvider<Odm> = CollectionDataProvider::new(
        inert_registry("Dummy"),
        vec![Extension::collection(RecordingExtension::new(
            "first", false, &log,
        ))],
    );

    let err = provider
        .get_collection("Dummy", None, &mut Context::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::MissingBuilderCapability { ref resource, capability }
            if resource == "Dummy" && capability == "an aggregation builder"
    ));
    assert!(calls(&log).is_empty());
}

#[test]
fn document_repository_has_no_query_builder() {
    let metadata = Arc::new(dummy_metadata());
    let manager = Arc::new(sift::odm::DocumentManager::new(
        Arc::clone(&metadata),
        Arc::new(MemoryDocumentStore::new()),
    ));
    let provider: CollectionDataProvider<Orm> =
        CollectionDataProvider::new(Arc::new(registry_for(&metadata, manager)), Vec::new());

    let err = provider.supports("Dummy", None).unwrap_err();
    assert!(matches!(err, ProviderError::MissingBuilderCapability { .. }));
}

// -------------------------------------------------------------------------
// Extension pipeline
// -------------------------------------------------------------------------

#[tokio::test]
async fn every_extension_applies_once_in_order() {
    let log = new_log();
    let executor = Arc::new(RecordingSqlExecutor::default());
    let provider: CollectionDataProvider<Orm> = CollectionDataProvider::new(
        orm_registry(Arc::clone(&executor)),
        vec![
            Extension::collection(RecordingExtension::new("first", true, &log)),
            Extension::result(RecordingExtension::new("second", false, &log)),
            Extension::result(RecordingExtension::new("third", true, &log)),
            Extension::result(RecordingExtension::new("fourth", true, &log)),
        ],
    );

    let mut context = Context::new();
    let result = provider
        .get_collection("Dummy", None, &mut context)
        .await
        .unwrap();

    assert_eq!(
        calls(&log),
        vec![
            "first:apply",
            "second:apply",
            "third:apply",
            "fourth:apply",
            "second:supports_result",
            "third:supports_result",
            "third:get_result",
        ]
    );
    assert_eq!(
        result,
        CollectionResult::Items(vec![json!({ "stage": "third" })])
    );
    assert!(executor.queries().is_empty());
}

#[tokio::test]
async fn later_stages_see_earlier_context_changes() {
    let log = new_log();
    let provider: CollectionDataProvider<Orm> = CollectionDataProvider::new(
        orm_registry(Arc::new(RecordingSqlExecutor::default())),
        vec![
            Extension::collection(RecordingExtension::new("first", false, &log)),
            Extension::collection(RecordingExtension::new("second", false, &log)),
        ],
    );

    let mut context = Context::new();
    provider
        .get_collection("Dummy", None, &mut context)
        .await
        .unwrap();

    assert_eq!(context.get("seen:first"), Some(&json!(true)));
    assert_eq!(context.get("seen:second"), Some(&json!(true)));
}

#[tokio::test]
async fn no_supporting_stage_falls_back_to_execution() {
    let log = new_log();
    let executor = Arc::new(RecordingSqlExecutor::new(dummy_documents(3)));
    let provider: CollectionDataProvider<Orm> = CollectionDataProvider::new(
        orm_registry(Arc::clone(&executor)),
        vec![
            Extension::collection(RecordingExtension::new("first", true, &log)),
            Extension::result(RecordingExtension::new("second", false, &log)),
        ],
    );

    let result = provider
        .get_collection("Dummy", None, &mut Context::new())
        .await
        .unwrap();

    assert_eq!(result, CollectionResult::Items(dummy_documents(3)));
    assert!(result.paginator().is_none());
    assert_eq!(
        calls(&log),
        vec!["first:apply", "second:apply", "second:supports_result"]
    );

    let queries = executor.page_queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].sql.contains("FROM \"dummy\" AS \"o\""));
    assert!(!queries[0].sql.contains("LIMIT"));
}

#[tokio::test]
async fn document_provider_executes_pipeline_by_default() {
    let metadata = Arc::new(dummy_metadata());
    let store = MemoryDocumentStore::new().with_collection("dummy", dummy_documents(4));
    let manager = Arc::new(sift::odm::DocumentManager::new(
        Arc::clone(&metadata),
        Arc::new(store),
    ));
    let provider: CollectionDataProvider<Odm> =
        CollectionDataProvider::new(Arc::new(registry_for(&metadata, manager)), Vec::new());

    let result = provider
        .get_collection("Dummy", None, &mut Context::new())
        .await
        .unwrap();
    assert_eq!(result.len(), 4);
}

#[test]
fn build_applies_extensions_without_executing() {
    let log = new_log();
    let executor = Arc::new(RecordingSqlExecutor::default());
    let provider: CollectionDataProvider<Orm> = CollectionDataProvider::new(
        orm_registry(Arc::clone(&executor)),
        vec![Extension::result(RecordingExtension::new("only", true, &log))],
    );

    let builder = provider.build("Dummy", None, &mut Context::new()).unwrap();
    assert_eq!(builder.table(), "dummy");
    assert_eq!(calls(&log), vec!["only:apply"]);
    assert!(executor.queries().is_empty());
}
