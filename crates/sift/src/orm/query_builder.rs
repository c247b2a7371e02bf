//! SQL query builder using SeaQuery.
//!
//! Extensions append to a [`QueryBuilder`]; it renders two statements from the
//! same joins and constraints:
//! - the page query (`SELECT alias.*` with optional LIMIT/OFFSET)
//! - the count query (`SELECT COUNT(*)`, no LIMIT/OFFSET)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use sea_query::{
    Alias, Asterisk, Expr, JoinType, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
    Value, Values,
};

use super::SqlExecutor;
use crate::metadata::{ResolvedProperty, StorageType};

/// Root alias used for the resource table.
pub const ROOT_ALIAS: &str = "o";

/// Generates unique join aliases and parameter names for one builder.
#[derive(Debug, Clone, Default)]
pub struct QueryNameGenerator {
    joins: u32,
    parameters: u32,
}

impl QueryNameGenerator {
    /// Alias for a join on `association` (e.g. `relatedDummy_a1`).
    pub fn generate_join_alias(&mut self, association: &str) -> String {
        self.joins += 1;
        format!("{association}_a{}", self.joins)
    }

    /// Name for a bound parameter on `field` (e.g. `price_p1`).
    pub fn generate_parameter_name(&mut self, field: &str) -> String {
        self.parameters += 1;
        format!("{field}_p{}", self.parameters)
    }
}

/// A value bound by a filter, with its storage type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
    pub storage_type: StorageType,
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinType,
    table: String,
    alias: String,
    on: SimpleExpr,
}

/// Mutable SQL query under construction for one resource.
pub struct QueryBuilder {
    table: String,
    root_alias: String,
    joins: Vec<Join>,
    /// Association path → join alias, so repeated paths reuse one join.
    join_aliases: HashMap<String, String>,
    conditions: Vec<SimpleExpr>,
    parameters: Vec<BoundParameter>,
    names: QueryNameGenerator,
    first_result: Option<u64>,
    max_results: Option<u64>,
    executor: Arc<dyn SqlExecutor>,
}

impl QueryBuilder {
    /// Create an empty builder selecting from `table AS root_alias`.
    pub fn new(table: &str, root_alias: &str, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            table: table.to_string(),
            root_alias: root_alias.to_string(),
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            conditions: Vec::new(),
            parameters: Vec::new(),
            names: QueryNameGenerator::default(),
            first_result: None,
            max_results: None,
            executor,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Alias of an established join for an association path.
    pub fn join_alias(&self, path: &str) -> Option<&str> {
        self.join_aliases.get(path).map(String::as_str)
    }

    /// Number of joins.
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// Number of WHERE constraints.
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// Parameters bound so far, in binding order.
    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }

    /// Join every association on a resolved property path and return the
    /// alias owning the leaf field. Joins already established for a path are
    /// reused.
    pub fn join_property_path(&mut self, property: &ResolvedProperty<'_>) -> String {
        let mut alias = self.root_alias.clone();
        for step in &property.associations {
            if let Some(existing) = self.join_aliases.get(&step.path) {
                alias = existing.clone();
                continue;
            }

            let join_alias = self.names.generate_join_alias(step.name);
            let association = step.association;
            let local_field = association.local_field.as_deref().unwrap_or(step.name);
            let foreign_field = association.foreign_field.as_deref().unwrap_or("id");
            let on = Expr::col((Alias::new(&alias), Alias::new(local_field)))
                .equals((Alias::new(&join_alias), Alias::new(foreign_field)));
            let kind = if association.nullable {
                JoinType::LeftJoin
            } else {
                JoinType::InnerJoin
            };

            self.joins.push(Join {
                kind,
                table: step.target.source().to_string(),
                alias: join_alias.clone(),
                on,
            });
            self.join_aliases.insert(step.path.clone(), join_alias.clone());
            alias = join_alias;
        }
        alias
    }

    /// Append a raw constraint.
    pub fn and_where(&mut self, condition: SimpleExpr) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    /// Append `alias.field = value`, binding `value` with its storage type.
    pub fn and_where_equals(
        &mut self,
        alias: &str,
        field: &str,
        value: Value,
        storage_type: StorageType,
    ) -> &mut Self {
        let operand = self.bind(field, value, storage_type);
        let condition = Expr::col((Alias::new(alias), Alias::new(field))).eq(operand);
        self.and_where(condition)
    }

    /// Append `alias.field IN (values…)`, binding each value with its storage type.
    pub fn and_where_in(
        &mut self,
        alias: &str,
        field: &str,
        values: Vec<Value>,
        storage_type: StorageType,
    ) -> &mut Self {
        let operands: Vec<SimpleExpr> = values
            .into_iter()
            .map(|value| self.bind(field, value, storage_type))
            .collect();
        let condition = Expr::col((Alias::new(alias), Alias::new(field))).is_in(operands);
        self.and_where(condition)
    }

    fn bind(&mut self, field: &str, value: Value, storage_type: StorageType) -> SimpleExpr {
        let name = self.names.generate_parameter_name(field);
        self.parameters.push(BoundParameter {
            name,
            value: value.clone(),
            storage_type,
        });
        match storage_type {
            // Decimals travel as text and are cast server side to keep precision.
            StorageType::Decimal => Expr::val(value).cast_as(Alias::new("numeric")),
            _ => SimpleExpr::Value(value),
        }
    }

    /// Set the OFFSET.
    pub fn set_first_result(&mut self, offset: u64) -> &mut Self {
        self.first_result = Some(offset);
        self
    }

    /// Set the LIMIT.
    pub fn set_max_results(&mut self, limit: u64) -> &mut Self {
        self.max_results = Some(limit);
        self
    }

    pub fn first_result(&self) -> Option<u64> {
        self.first_result
    }

    pub fn max_results(&self) -> Option<u64> {
        self.max_results
    }

    fn add_joins_and_conditions(&self, query: &mut SelectStatement) {
        query.from_as(Alias::new(&self.table), Alias::new(&self.root_alias));
        for join in &self.joins {
            query.join_as(
                join.kind,
                Alias::new(&join.table),
                Alias::new(&join.alias),
                join.on.clone(),
            );
        }
        for condition in &self.conditions {
            query.and_where(condition.clone());
        }
    }

    /// The page query.
    pub fn select_statement(&self) -> SelectStatement {
        let mut query = Query::select();
        query.column((Alias::new(&self.root_alias), Asterisk));
        self.add_joins_and_conditions(&mut query);
        if let Some(limit) = self.max_results {
            query.limit(limit);
        }
        if let Some(offset) = self.first_result {
            query.offset(offset);
        }
        query
    }

    /// The total count query over the same joins and constraints.
    pub fn count_statement(&self) -> SelectStatement {
        let mut query = Query::select();
        query.expr(Expr::col(Asterisk).count());
        self.add_joins_and_conditions(&mut query);
        query
    }

    /// Page query with positional placeholders and typed values.
    pub fn build(&self) -> (String, Values) {
        self.select_statement().build(PostgresQueryBuilder)
    }

    /// Count query with positional placeholders and typed values.
    pub fn build_count(&self) -> (String, Values) {
        self.count_statement().build(PostgresQueryBuilder)
    }

    /// Page query with values inlined, for display.
    pub fn to_sql(&self) -> String {
        self.select_statement().to_string(PostgresQueryBuilder)
    }

    /// Run the page query.
    pub async fn execute(&self) -> Result<Vec<serde_json::Value>> {
        let (sql, values) = self.build();
        self.executor.fetch_all(&sql, values).await
    }

    /// Run the count query.
    pub async fn count(&self) -> Result<u64> {
        let (sql, values) = self.build_count();
        self.executor.fetch_count(&sql, values).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::{AssociationMetadata, MetadataRegistry, ResourceMetadata};
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl SqlExecutor for NoopExecutor {
        async fn fetch_all(&self, _sql: &str, _values: Values) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }

        async fn fetch_count(&self, _sql: &str, _values: Values) -> Result<u64> {
            Ok(0)
        }
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new("dummy", ROOT_ALIAS, Arc::new(NoopExecutor))
    }

    fn metadata() -> MetadataRegistry {
        MetadataRegistry::new()
            .with_resource(
                ResourceMetadata::new("Dummy")
                    .with_source("dummy")
                    .with_association(
                        "relatedDummy",
                        AssociationMetadata::new("RelatedDummy")
                            .with_local_field("related_dummy_id"),
                    ),
            )
            .with_resource(
                ResourceMetadata::new("RelatedDummy")
                    .with_source("related_dummy")
                    .with_property("age", StorageType::Integer)
                    .with_association("thirdLevel", AssociationMetadata::new("ThirdLevel")),
            )
            .with_resource(
                ResourceMetadata::new("ThirdLevel")
                    .with_source("third_level")
                    .with_property("level", StorageType::Integer),
            )
    }

    #[test]
    fn name_generator_counts_independently() {
        let mut names = QueryNameGenerator::default();
        assert_eq!(names.generate_join_alias("relatedDummy"), "relatedDummy_a1");
        assert_eq!(names.generate_parameter_name("price"), "price_p1");
        assert_eq!(names.generate_parameter_name("price"), "price_p2");
        assert_eq!(names.generate_join_alias("thirdLevel"), "thirdLevel_a2");
    }

    #[test]
    fn empty_builder_selects_everything() {
        let sql = builder().to_sql();
        assert!(sql.contains("FROM \"dummy\" AS \"o\""), "{sql}");
        assert!(sql.contains("\"o\".*"), "{sql}");
        assert!(!sql.contains("WHERE"), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
    }

    #[test]
    fn equality_binds_typed_value() {
        let mut b = builder();
        b.and_where_equals("o", "id", Value::from(12i32), StorageType::Integer);
        let (sql, values) = b.build();

        assert!(sql.contains("\"o\".\"id\" = $1"), "{sql}");
        assert_eq!(values.0, vec![Value::Int(Some(12))]);
        assert_eq!(b.parameters()[0].name, "id_p1");
        assert_eq!(b.parameters()[0].storage_type, StorageType::Integer);
    }

    #[test]
    fn decimal_is_cast_to_numeric() {
        let mut b = builder();
        b.and_where_equals("o", "price", Value::from("12.50"), StorageType::Decimal);
        let sql = b.to_sql();
        assert!(sql.contains("CAST("), "{sql}");
        assert!(sql.contains("'12.50'"), "{sql}");
        assert!(sql.contains("numeric"), "{sql}");
        assert_eq!(b.parameters()[0].value, Value::from("12.50"));
    }

    #[test]
    fn in_list_binds_each_value() {
        let mut b = builder();
        b.and_where_in(
            "o",
            "id",
            vec![Value::from(1i64), Value::from(2i64)],
            StorageType::BigInt,
        );
        let (sql, values) = b.build();
        assert!(sql.contains("IN ($1, $2)"), "{sql}");
        assert_eq!(values.0.len(), 2);
        assert_eq!(b.parameters().len(), 2);
    }

    #[test]
    fn limit_and_offset_only_on_page_query() {
        let mut b = builder();
        b.set_first_result(20).set_max_results(10);
        let sql = b.to_sql();
        assert!(sql.contains("LIMIT 10"), "{sql}");
        assert!(sql.contains("OFFSET 20"), "{sql}");

        let (count_sql, _) = b.build_count();
        assert!(count_sql.contains("COUNT(*)"), "{count_sql}");
        assert!(!count_sql.contains("LIMIT"), "{count_sql}");
    }

    #[test]
    fn nested_path_joins_once_per_path() {
        let meta = metadata();
        let mut b = builder();

        let age = meta.resolve_property("Dummy", "relatedDummy.age").unwrap();
        let first = b.join_property_path(&age);
        let second = b.join_property_path(&age);
        assert_eq!(first, "relatedDummy_a1");
        assert_eq!(first, second);
        assert_eq!(b.join_count(), 1);

        let level = meta
            .resolve_property("Dummy", "relatedDummy.thirdLevel.level")
            .unwrap();
        let leaf = b.join_property_path(&level);
        assert_eq!(leaf, "thirdLevel_a2");
        assert_eq!(b.join_count(), 2);
        assert_eq!(b.join_alias("relatedDummy"), Some("relatedDummy_a1"));

        let sql = b.to_sql();
        assert!(
            sql.contains("LEFT JOIN \"related_dummy\" AS \"relatedDummy_a1\""),
            "{sql}"
        );
        assert!(
            sql.contains("\"o\".\"related_dummy_id\" = \"relatedDummy_a1\".\"id\""),
            "{sql}"
        );
        assert!(
            sql.contains("\"relatedDummy_a1\".\"thirdLevel\" = \"thirdLevel_a2\".\"id\""),
            "{sql}"
        );
    }

    #[test]
    fn plain_property_uses_root_alias() {
        let meta = MetadataRegistry::new().with_resource(
            ResourceMetadata::new("Dummy").with_property("id", StorageType::Integer),
        );
        let mut b = builder();
        let id = meta.resolve_property("Dummy", "id").unwrap();
        assert_eq!(b.join_property_path(&id), "o");
        assert_eq!(b.join_count(), 0);
    }

    #[test]
    fn builder_can_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueryBuilder>();
    }

    #[tokio::test]
    async fn execute_delegates_to_executor() {
        let b = builder();
        assert!(b.execute().await.unwrap().is_empty());
        assert_eq!(b.count().await.unwrap(), 0);
    }
}
