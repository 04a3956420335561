//! Bounded read-only execution of sanitized SQL.
//!
//! Every statement runs inside its own transaction with `READ ONLY` and a local
//! `statement_timeout` applied before the query. The transaction guard returns the pooled
//! connection on every exit path, including errors; a connection is only ever acquired after
//! sanitization has succeeded.

use anyhow::Context;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};

#[derive(Debug, Clone)]
pub struct DbProbe {
    pub version: String,
    pub db: String,
    pub user: String,
}

/// Run a sanitized statement and return at most `max_rows` rows as JSON objects keyed by
/// column name.
pub async fn fetch_rows(
    pool: &PgPool,
    sql: &str,
    statement_timeout_ms: u64,
    max_rows: usize,
) -> anyhow::Result<Vec<Value>> {
    let mut tx = pool.begin().await.context("acquire connection")?;
    prepare_session(&mut tx, statement_timeout_ms).await?;

    let fetched = sqlx::query(sql)
        .fetch_all(&mut *tx)
        .await
        .context("execute query")?;
    tx.rollback().await.context("release connection")?;

    Ok(fetched.iter().take(max_rows).map(row_to_json).collect())
}

/// Trivial read-only probe behind `/test/db`.
pub async fn probe(pool: &PgPool, statement_timeout_ms: u64) -> anyhow::Result<DbProbe> {
    let mut tx = pool.begin().await.context("acquire connection")?;
    prepare_session(&mut tx, statement_timeout_ms).await?;

    let row = sqlx::query(
        "SELECT version() AS version, current_database()::text AS db, current_user::text AS usr",
    )
    .fetch_one(&mut *tx)
    .await
    .context("run probe query")?;
    tx.rollback().await.context("release connection")?;

    Ok(DbProbe {
        version: row.try_get("version").context("decode version")?,
        db: row.try_get("db").context("decode db")?,
        user: row.try_get("usr").context("decode user")?,
    })
}

async fn prepare_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    statement_timeout_ms: u64,
) -> anyhow::Result<()> {
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut **tx)
        .await
        .context("set read-only transaction")?;
    sqlx::query(&format!("SET LOCAL statement_timeout = {statement_timeout_ms}"))
        .execute(&mut **tx)
        .await
        .context("set statement timeout")?;
    Ok(())
}

fn row_to_json(row: &PgRow) -> Value {
    let mut out = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            column_to_json(row, idx, column.type_info().name()),
        );
    }
    Value::Object(out)
}

/// Decode one column by Postgres type name.
///
/// NULL-aware; types with no decoder under our feature set (NUMERIC, arrays, ranges, ...)
/// degrade to a `<typename>` marker instead of failing the whole request.
fn column_to_json(row: &PgRow, idx: usize, type_name: &str) -> Value {
    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, sqlx::Error>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx)
    }

    let value = match type_name {
        "BOOL" => get::<bool>(row, idx).map(|v| v.map(Value::Bool)),
        "INT2" => get::<i16>(row, idx).map(|v| v.map(|n| Value::Number((n as i64).into()))),
        "INT4" => get::<i32>(row, idx).map(|v| v.map(|n| Value::Number((n as i64).into()))),
        "INT8" => get::<i64>(row, idx).map(|v| v.map(|n| Value::Number(n.into()))),
        "FLOAT4" => get::<f32>(row, idx).map(|v| v.map(|n| number_or_null(n as f64))),
        "FLOAT8" => get::<f64>(row, idx).map(|v| v.map(number_or_null)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            get::<String>(row, idx).map(|v| v.map(Value::String))
        }
        "UUID" => get::<uuid::Uuid>(row, idx).map(|v| v.map(|u| Value::String(u.to_string()))),
        "JSON" | "JSONB" => get::<Value>(row, idx),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339()))),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| Value::String(t.to_string()))),
        "DATE" => {
            get::<chrono::NaiveDate>(row, idx).map(|v| v.map(|d| Value::String(d.to_string())))
        }
        "TIME" => {
            get::<chrono::NaiveTime>(row, idx).map(|v| v.map(|t| Value::String(t.to_string())))
        }
        _ => get::<String>(row, idx).map(|v| v.map(Value::String)),
    };

    match value {
        Ok(Some(v)) => v,
        Ok(None) => Value::Null,
        Err(_) => Value::String(format!("<{}>", type_name.to_ascii_lowercase())),
    }
}

fn number_or_null(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
