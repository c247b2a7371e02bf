//! PostgreSQL execution through sqlx.
//!
//! SeaQuery renders `$n` placeholders; the values are bound positionally and
//! each row is materialized with `row_to_json`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sea_query::{Value, Values};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{Arguments, PgPool};

use super::SqlExecutor;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

fn bind_values(values: Values) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for value in values.0 {
        let bound = match value {
            Value::Bool(v) => args.add(v),
            Value::TinyInt(v) => args.add(v.map(i16::from)),
            Value::SmallInt(v) => args.add(v),
            Value::Int(v) => args.add(v),
            Value::BigInt(v) => args.add(v),
            Value::TinyUnsigned(v) => args.add(v.map(i16::from)),
            Value::SmallUnsigned(v) => args.add(v.map(i32::from)),
            Value::Unsigned(v) => args.add(v.map(i64::from)),
            // LIMIT and OFFSET are rendered as unsigned parameters.
            Value::BigUnsigned(v) => {
                let v = v
                    .map(i64::try_from)
                    .transpose()
                    .context("unsigned parameter exceeds BIGINT")?;
                args.add(v)
            }
            Value::Float(v) => args.add(v),
            Value::Double(v) => args.add(v),
            Value::String(v) => args.add(v.map(|s| *s)),
            Value::Uuid(v) => args.add(v.map(|u| *u)),
            other => bail!("unsupported parameter type: {other:?}"),
        };
        bound.map_err(|e| anyhow::anyhow!("failed to bind parameter: {e}"))?;
    }
    Ok(args)
}

#[async_trait]
impl SqlExecutor for PgPool {
    async fn fetch_all(&self, sql: &str, values: Values) -> Result<Vec<serde_json::Value>> {
        let wrapped = format!("SELECT row_to_json(t) FROM ({sql}) AS t");
        let args = bind_values(values)?;
        sqlx::query_scalar_with::<_, serde_json::Value, _>(&wrapped, args)
            .fetch_all(self)
            .await
            .context("failed to fetch collection")
    }

    async fn fetch_count(&self, sql: &str, values: Values) -> Result<u64> {
        let args = bind_values(values)?;
        let count = sqlx::query_scalar_with::<_, i64, _>(sql, args)
            .fetch_one(self)
            .await
            .context("failed to count collection")?;
        Ok(count.max(0) as u64)
    }
}
