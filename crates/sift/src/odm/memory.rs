//! In-memory document store evaluating the aggregation stages the builder
//! emits. Backs the `run` command and the tests.

use std::collections::HashMap;

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::DocumentExecutor;

/// Named collections of JSON documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a collection, builder style.
    pub fn with_collection(mut self, name: &str, documents: Vec<Value>) -> Self {
        self.insert_collection(name, documents);
        self
    }

    pub fn insert_collection(&mut self, name: &str, documents: Vec<Value>) {
        self.collections.insert(name.to_string(), documents);
    }

    /// Load `{ "<collection>": [documents…], … }`.
    pub fn from_json(fixtures: Value) -> Result<Self> {
        let Value::Object(collections) = fixtures else {
            bail!("fixtures must be an object of collections");
        };
        let mut store = Self::new();
        for (name, documents) in collections {
            let Value::Array(documents) = documents else {
                bail!("collection '{name}' must be an array of documents");
            };
            store.insert_collection(&name, documents);
        }
        Ok(store)
    }

    pub fn collection(&self, name: &str) -> Option<&[Value]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    fn run(&self, mut documents: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>> {
        for stage in pipeline {
            documents = self.apply_stage(documents, stage)?;
        }
        Ok(documents)
    }

    fn apply_stage(&self, documents: Vec<Value>, stage: &Value) -> Result<Vec<Value>> {
        let (operator, argument) = stage
            .as_object()
            .filter(|body| body.len() == 1)
            .and_then(|body| body.iter().next())
            .ok_or_else(|| anyhow!("stage must be an object with one operator: {stage}"))?;

        match operator.as_str() {
            "$match" => {
                let conditions = argument
                    .as_object()
                    .ok_or_else(|| anyhow!("$match expects an object"))?;
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, conditions)? {
                        kept.push(document);
                    }
                }
                Ok(kept)
            }
            "$lookup" => self.lookup(documents, argument),
            "$unwind" => {
                let path = argument
                    .as_str()
                    .and_then(|p| p.strip_prefix('$'))
                    .ok_or_else(|| anyhow!("$unwind expects a \"$field\" path"))?;
                Ok(unwind(documents, path))
            }
            "$skip" => {
                let n = as_count(argument, "$skip")?;
                Ok(documents.into_iter().skip(n).collect())
            }
            "$limit" => {
                let n = as_count(argument, "$limit")?;
                if n == 0 {
                    bail!("$limit must be positive");
                }
                Ok(documents.into_iter().take(n).collect())
            }
            "$count" => {
                let field = argument
                    .as_str()
                    .ok_or_else(|| anyhow!("$count expects a field name"))?;
                if documents.is_empty() {
                    return Ok(Vec::new());
                }
                let mut output = Map::new();
                output.insert(field.to_string(), Value::from(documents.len()));
                Ok(vec![Value::Object(output)])
            }
            "$facet" => {
                let branches = argument
                    .as_object()
                    .ok_or_else(|| anyhow!("$facet expects an object"))?;
                let mut output = Map::new();
                for (name, sub_pipeline) in branches {
                    let sub_pipeline = sub_pipeline
                        .as_array()
                        .ok_or_else(|| anyhow!("$facet branch '{name}' must be an array"))?;
                    let result = self
                        .run(documents.clone(), sub_pipeline)
                        .with_context(|| format!("in $facet branch '{name}'"))?;
                    output.insert(name.clone(), Value::Array(result));
                }
                Ok(vec![Value::Object(output)])
            }
            other => bail!("unsupported aggregation stage '{other}'"),
        }
    }

    fn lookup(&self, mut documents: Vec<Value>, argument: &Value) -> Result<Vec<Value>> {
        let field = |name: &str| {
            argument
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("$lookup requires a string '{name}'"))
        };
        let from = field("from")?;
        let local_field = field("localField")?;
        let foreign_field = field("foreignField")?;
        let alias = field("as")?;

        let foreign = self.collection(from).unwrap_or_default();
        for document in &mut documents {
            let local = get_path(document, local_field).cloned();
            let joined: Vec<Value> = foreign
                .iter()
                .filter(|candidate| {
                    let key = get_path(candidate, foreign_field);
                    match &local {
                        Some(Value::Array(locals)) => {
                            locals.iter().any(|l| key.is_some_and(|k| values_equal(k, l)))
                        }
                        Some(local) => key.is_some_and(|k| values_equal(k, local)),
                        None => key.is_none_or(Value::is_null),
                    }
                })
                .cloned()
                .collect();
            set_path(document, alias, Value::Array(joined));
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentExecutor for MemoryDocumentStore {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> Result<Vec<Value>> {
        let documents = self.collection(collection).unwrap_or_default().to_vec();
        self.run(documents, &pipeline)
            .with_context(|| format!("aggregation on '{collection}' failed"))
    }
}

fn as_count(argument: &Value, stage: &str) -> Result<usize> {
    argument
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| anyhow!("{stage} expects a non-negative integer"))
}

fn matches(document: &Value, conditions: &Map<String, Value>) -> Result<bool> {
    for (field, predicate) in conditions {
        let actual = get_path(document, field);
        let matched = match predicate.as_object() {
            Some(operators) if operators.keys().any(|k| k.starts_with('$')) => {
                let mut all = true;
                for (operator, operand) in operators {
                    let ok = match operator.as_str() {
                        "$in" => {
                            let candidates = operand
                                .as_array()
                                .ok_or_else(|| anyhow!("$in expects an array"))?;
                            candidates.iter().any(|c| field_equals(actual, c))
                        }
                        "$eq" => field_equals(actual, operand),
                        other => bail!("unsupported match operator '{other}'"),
                    };
                    all &= ok;
                }
                all
            }
            _ => field_equals(actual, predicate),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality as a query sees it: arrays match when any element does, missing
/// fields match only `null`.
fn field_equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn get_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut current = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// One output document per array element; documents whose path is missing,
/// null or an empty array are dropped.
fn unwind(documents: Vec<Value>, path: &str) -> Vec<Value> {
    let mut output = Vec::with_capacity(documents.len());
    for document in documents {
        let items = match get_path(&document, path) {
            Some(Value::Array(items)) => Some(items.clone()),
            None | Some(Value::Null) => continue,
            Some(_) => None,
        };
        let Some(items) = items else {
            output.push(document);
            continue;
        };
        for item in items {
            let mut copy = document.clone();
            set_path(&mut copy, path, item);
            output.push(copy);
        }
    }
    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryDocumentStore {
        MemoryDocumentStore::new()
            .with_collection(
                "dummies",
                vec![
                    json!({ "_id": 1, "price": 10, "relatedDummy": 10 }),
                    json!({ "_id": 2, "price": 12.5, "relatedDummy": 11 }),
                    json!({ "_id": 3, "price": 10.0, "relatedDummy": 12 }),
                ],
            )
            .with_collection(
                "related_dummies",
                vec![
                    json!({ "_id": 10, "age": 30 }),
                    json!({ "_id": 11, "age": 40 }),
                ],
            )
    }

    #[tokio::test]
    async fn match_compares_numbers_by_value() {
        let out = store()
            .aggregate("dummies", vec![json!({ "$match": { "price": 10 } })])
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn match_in() {
        let out = store()
            .aggregate(
                "dummies",
                vec![json!({ "$match": { "_id": { "$in": [2, 3, 9] } } })],
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn lookup_unwind_and_match_nested() {
        let pipeline = vec![
            json!({ "$lookup": {
                "from": "related_dummies",
                "localField": "relatedDummy",
                "foreignField": "_id",
                "as": "relatedDummy_lkup",
            } }),
            json!({ "$unwind": "$relatedDummy_lkup" }),
            json!({ "$match": { "relatedDummy_lkup.age": 40 } }),
        ];
        let out = store().aggregate("dummies", pipeline).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["_id"], json!(2));
        assert_eq!(out[0]["relatedDummy_lkup"]["age"], json!(40));
    }

    #[tokio::test]
    async fn unwind_drops_unmatched_lookups() {
        let pipeline = vec![
            json!({ "$lookup": {
                "from": "related_dummies",
                "localField": "relatedDummy",
                "foreignField": "_id",
                "as": "r",
            } }),
            json!({ "$unwind": "$r" }),
        ];
        let out = store().aggregate("dummies", pipeline).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn facet_with_skip_limit_and_count() {
        let pipeline = vec![json!({ "$facet": {
            "results": [{ "$skip": 1 }, { "$limit": 1 }],
            "count": [{ "$count": "count" }],
        } })];
        let out = store().aggregate("dummies", pipeline).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["results"].as_array().unwrap().len(), 1);
        assert_eq!(out[0]["results"][0]["_id"], json!(2));
        assert_eq!(out[0]["count"], json!([{ "count": 3 }]));
    }

    #[tokio::test]
    async fn count_of_nothing_is_empty() {
        let pipeline = vec![
            json!({ "$match": { "price": 99 } }),
            json!({ "$count": "count" }),
        ];
        let out = store().aggregate("dummies", pipeline).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_stage_and_zero_limit() {
        let err = store()
            .aggregate("dummies", vec![json!({ "$sort": { "price": 1 } })])
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("unsupported aggregation stage '$sort'"));

        let err = store()
            .aggregate("dummies", vec![json!({ "$limit": 0 })])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("$limit must be positive"));
    }

    #[test]
    fn from_json_requires_arrays() {
        let store = MemoryDocumentStore::from_json(json!({ "dummies": [{ "_id": 1 }] })).unwrap();
        assert_eq!(store.collection("dummies").map(<[Value]>::len), Some(1));
        assert!(MemoryDocumentStore::from_json(json!({ "dummies": {} })).is_err());
        assert!(MemoryDocumentStore::from_json(json!([])).is_err());
    }

    #[test]
    fn unknown_collection_is_empty() {
        assert!(store().collection("missing").is_none());
    }
}
