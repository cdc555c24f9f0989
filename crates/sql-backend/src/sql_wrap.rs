//! Relational execution on top of sea-orm.
//!
//! Statements are raw SQL with `?` placeholders, as found in the mapping
//! catalog. Results are read positionally and rendered as text, which is
//! what directory values are made of.

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr, QueryResult,
    Statement, TransactionTrait, Value,
};
use tracing::{debug, warn};

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq, Eq, derive_more::From)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_owned())
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::String(None),
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Text(s) => Value::from(s),
        }
    }
}

/// One result row; `None` is SQL NULL.
pub type SqlRow = Vec<Option<String>>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs a query and reads the first `columns` columns of every row.
    async fn query_rows(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        columns: usize,
    ) -> Result<Vec<SqlRow>, DbErr>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, DbErr>;
}

#[async_trait]
pub trait SqlTransaction: SqlExecutor + Sized {
    async fn commit(self) -> Result<(), DbErr>;
    async fn rollback(self) -> Result<(), DbErr>;
}

#[async_trait]
pub trait SqlConnection: SqlExecutor + 'static {
    type Transaction: SqlTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DbErr>;
}

/// Rewrites `?` placeholders for backends using numbered parameters.
fn rewrite_placeholders(backend: DatabaseBackend, sql: &str) -> String {
    if backend != DatabaseBackend::Postgres {
        return sql.to_owned();
    }
    let mut result = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                result.push(c);
            }
            '?' if !in_string => {
                index += 1;
                result.push_str(&format!("${index}"));
            }
            _ => result.push(c),
        }
    }
    result
}

fn statement(backend: DatabaseBackend, sql: &str, params: Vec<SqlValue>) -> Statement {
    Statement::from_sql_and_values(
        backend,
        rewrite_placeholders(backend, sql),
        params.into_iter().map(Value::from),
    )
}

/// Reads a column as text whatever its native type.
fn read_column(row: &QueryResult, index: usize) -> Result<Option<String>, DbErr> {
    if let Ok(value) = row.try_get_by::<Option<String>, _>(index) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get_by::<Option<i64>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get_by::<Option<i32>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get_by::<Option<f64>, _>(index) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get_by::<Option<bool>, _>(index) {
        return Ok(value.map(|v| if v { "TRUE" } else { "FALSE" }.to_owned()));
    }
    row.try_get_by::<Option<Vec<u8>>, _>(index)
        .map(|value| value.map(|v| String::from_utf8_lossy(&v).into_owned()))
}

async fn query_rows_on<C: ConnectionTrait>(
    conn: &C,
    sql: &str,
    params: Vec<SqlValue>,
    columns: usize,
) -> Result<Vec<SqlRow>, DbErr> {
    debug!(sql, ?params, "Running query");
    let rows = conn
        .query_all(statement(conn.get_database_backend(), sql, params))
        .await
        .inspect_err(|e| warn!(sql, "Query failed: {}", e))?;
    rows.iter()
        .map(|row| (0..columns).map(|i| read_column(row, i)).collect())
        .collect()
}

async fn execute_on<C: ConnectionTrait>(
    conn: &C,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<u64, DbErr> {
    debug!(sql, ?params, "Executing statement");
    let result = conn
        .execute(statement(conn.get_database_backend(), sql, params))
        .await
        .inspect_err(|e| warn!(sql, "Statement failed: {}", e))?;
    Ok(result.rows_affected())
}

#[async_trait]
impl SqlExecutor for DatabaseConnection {
    async fn query_rows(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        columns: usize,
    ) -> Result<Vec<SqlRow>, DbErr> {
        query_rows_on(self, sql, params, columns).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, DbErr> {
        execute_on(self, sql, params).await
    }
}

#[async_trait]
impl SqlExecutor for DatabaseTransaction {
    async fn query_rows(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        columns: usize,
    ) -> Result<Vec<SqlRow>, DbErr> {
        query_rows_on(self, sql, params, columns).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, DbErr> {
        execute_on(self, sql, params).await
    }
}

#[async_trait]
impl SqlTransaction for DatabaseTransaction {
    async fn commit(self) -> Result<(), DbErr> {
        DatabaseTransaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), DbErr> {
        DatabaseTransaction::rollback(self).await
    }
}

#[async_trait]
impl SqlConnection for DatabaseConnection {
    type Transaction = DatabaseTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DbErr> {
        TransactionTrait::begin(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            rewrite_placeholders(
                DatabaseBackend::Postgres,
                "SELECT id FROM t WHERE a=? AND b='?' AND c=?"
            ),
            "SELECT id FROM t WHERE a=$1 AND b='?' AND c=$2"
        );
        assert_eq!(
            rewrite_placeholders(DatabaseBackend::Sqlite, "SELECT ?"),
            "SELECT ?"
        );
    }

    #[tokio::test]
    async fn test_query_reads_any_column_type() {
        crate::logging::init_for_tests();
        let sql_pool = crate::test_utils::get_in_memory_db().await;
        let rows = sql_pool
            .query_rows("SELECT 'a', 42, 1.5, NULL, ?", vec![SqlValue::Integer(7)], 5)
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Some("a".to_owned()),
                Some("42".to_owned()),
                Some("1.5".to_owned()),
                None,
                Some("7".to_owned()),
            ]]
        );
    }
}
