//! Numeric equality filter.
//!
//! `?price=12.5` constrains `price` to equal `12.5`; `?id[]=1&id[]=2`
//! constrains `id` to the listed values. The value must be a well-formed
//! literal for the property's storage type or the property is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{Filter, FilterDescription, PropertyFilter};
use crate::context::{Context, FilterValue};
use crate::error::ProviderResult;
use crate::metadata::{MetadataRegistry, NumericClass, ResolvedProperty, StorageType};
use crate::odm::{AggregationBuilder, Odm};
use crate::orm::{Orm, QueryBuilder};

/// Storage types filtered as numbers by the relational backend.
pub const RELATIONAL_NUMERIC_TYPES: &[StorageType] = &[
    StorageType::SmallInt,
    StorageType::Integer,
    StorageType::BigInt,
    StorageType::Decimal,
    StorageType::Float,
];

/// Storage types filtered as numbers by the document backend.
pub const DOCUMENT_NUMERIC_TYPES: &[StorageType] = &[StorageType::Integer, StorageType::Float];

/// A validated numeric request value.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericValue {
    Integer(i64),
    /// Canonical decimal literal, kept as text to preserve precision.
    Decimal(String),
    Float(f64),
}

impl NumericValue {
    /// SQL value typed for the column.
    pub fn to_sql_value(&self, storage_type: StorageType) -> sea_query::Value {
        match self {
            NumericValue::Integer(n) => match storage_type {
                StorageType::SmallInt => sea_query::Value::SmallInt(Some(*n as i16)),
                StorageType::Integer => sea_query::Value::Int(Some(*n as i32)),
                _ => sea_query::Value::BigInt(Some(*n)),
            },
            NumericValue::Decimal(s) => sea_query::Value::String(Some(Box::new(s.clone()))),
            NumericValue::Float(f) => sea_query::Value::Double(Some(*f)),
        }
    }

    /// JSON value for a `$match`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            NumericValue::Integer(n) => serde_json::Value::from(*n),
            NumericValue::Decimal(s) => serde_json::Value::String(s.clone()),
            NumericValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Parse `raw` as a literal of `storage_type`.
///
/// `None` for non-numeric types, malformed literals and integers that do not
/// fit the column width.
pub fn parse_numeric(raw: &str, storage_type: StorageType) -> Option<NumericValue> {
    match storage_type.numeric_class()? {
        NumericClass::Integer => {
            if !is_integer_literal(raw) {
                return None;
            }
            let n: i64 = raw.parse().ok()?;
            let fits = match storage_type {
                StorageType::SmallInt => i16::try_from(n).is_ok(),
                StorageType::Integer => i32::try_from(n).is_ok(),
                _ => true,
            };
            fits.then_some(NumericValue::Integer(n))
        }
        NumericClass::Decimal => {
            is_decimal_literal(raw).then(|| NumericValue::Decimal(raw.to_string()))
        }
        NumericClass::Float => {
            let allowed = |b: u8| b.is_ascii_digit() || b"+-.eE".contains(&b);
            if !raw.bytes().all(allowed) {
                return None;
            }
            let f: f64 = raw.parse().ok()?;
            f.is_finite().then_some(NumericValue::Float(f))
        }
    }
}

fn strip_sign(raw: &str) -> &str {
    raw.strip_prefix(['+', '-']).unwrap_or(raw)
}

fn is_integer_literal(raw: &str) -> bool {
    let digits = strip_sign(raw);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal_literal(raw: &str) -> bool {
    let body = strip_sign(raw);
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

/// Semantic type reported in filter descriptions.
pub fn semantic_type(class: NumericClass) -> &'static str {
    match class {
        NumericClass::Integer => "int",
        NumericClass::Float => "float",
        NumericClass::Decimal => "string",
    }
}

/// One accepted property with its coerced values.
struct NumericConstraint<'a> {
    property: ResolvedProperty<'a>,
    values: Vec<NumericValue>,
}

/// Equality filter on numeric properties.
#[derive(Debug, Clone)]
pub struct NumericFilter {
    properties: PropertyFilter,
}

impl NumericFilter {
    pub fn new(metadata: Arc<MetadataRegistry>, properties: Option<Vec<String>>) -> Self {
        Self {
            properties: PropertyFilter::new(metadata, properties),
        }
    }

    fn constraints<'a>(
        &'a self,
        resource: &str,
        context: &Context,
        numeric_types: &[StorageType],
    ) -> Vec<NumericConstraint<'a>> {
        let mut constraints = Vec::new();
        for (property, value) in context.filters() {
            if !self.properties.is_property_enabled(property) {
                continue;
            }
            let Some(resolved) = self.properties.resolve(resource, property) else {
                continue;
            };
            if !numeric_types.contains(&resolved.storage_type) {
                continue;
            }

            let raw: Vec<&str> = match value {
                FilterValue::Single(v) => vec![v.as_str()],
                FilterValue::List(vs) => vs.iter().map(String::as_str).collect(),
                FilterValue::Map(_) => {
                    debug!(
                        resource,
                        property = %property,
                        "numeric filter ignores operator values"
                    );
                    continue;
                }
            };
            let values: Option<Vec<NumericValue>> = raw
                .iter()
                .map(|v| parse_numeric(v, resolved.storage_type))
                .collect();
            match values {
                Some(values) if !values.is_empty() => constraints.push(NumericConstraint {
                    property: resolved,
                    values,
                }),
                _ => debug!(
                    resource,
                    property = %property,
                    storage_type = resolved.storage_type.as_str(),
                    "invalid numeric value, skipping property"
                ),
            }
        }
        constraints
    }

    fn describe(
        &self,
        resource: &str,
        numeric_types: &[StorageType],
    ) -> BTreeMap<String, FilterDescription> {
        let mut description = BTreeMap::new();
        for property in self.properties.enabled_properties(resource) {
            let Some(resolved) = self.properties.resolve(resource, &property) else {
                continue;
            };
            if !numeric_types.contains(&resolved.storage_type) {
                continue;
            }
            let Some(class) = resolved.storage_type.numeric_class() else {
                continue;
            };
            for (name, is_collection) in [
                (property.clone(), false),
                (format!("{property}[]"), true),
            ] {
                description.insert(
                    name,
                    FilterDescription {
                        property: property.clone(),
                        kind: semantic_type(class),
                        required: false,
                        is_collection,
                    },
                );
            }
        }
        description
    }
}

impl Filter<Orm> for NumericFilter {
    fn apply(
        &self,
        builder: &mut QueryBuilder,
        resource: &str,
        _operation: Option<&str>,
        context: &Context,
    ) -> ProviderResult<()> {
        for constraint in self.constraints(resource, context, RELATIONAL_NUMERIC_TYPES) {
            let storage_type = constraint.property.storage_type;
            let alias = builder.join_property_path(&constraint.property);
            let field = &constraint.property.field;
            let mut values: Vec<sea_query::Value> = constraint
                .values
                .iter()
                .map(|v| v.to_sql_value(storage_type))
                .collect();

            if values.len() == 1
                && let Some(value) = values.pop()
            {
                builder.and_where_equals(&alias, field, value, storage_type);
            } else {
                builder.and_where_in(&alias, field, values, storage_type);
            }
        }
        Ok(())
    }

    fn description(&self, resource: &str) -> BTreeMap<String, FilterDescription> {
        self.describe(resource, RELATIONAL_NUMERIC_TYPES)
    }
}

impl Filter<Odm> for NumericFilter {
    fn apply(
        &self,
        builder: &mut AggregationBuilder,
        resource: &str,
        _operation: Option<&str>,
        context: &Context,
    ) -> ProviderResult<()> {
        for constraint in self.constraints(resource, context, DOCUMENT_NUMERIC_TYPES) {
            let storage_type = constraint.property.storage_type;
            let field = builder.lookup_property_path(&constraint.property);
            let mut values: Vec<serde_json::Value> = constraint
                .values
                .iter()
                .map(NumericValue::to_json)
                .collect();

            if values.len() == 1
                && let Some(value) = values.pop()
            {
                builder.match_equals(&field, value, storage_type);
            } else {
                builder.match_in(&field, values, storage_type);
            }
        }
        Ok(())
    }

    fn description(&self, resource: &str) -> BTreeMap<String, FilterDescription> {
        self.describe(resource, DOCUMENT_NUMERIC_TYPES)
    }
}
