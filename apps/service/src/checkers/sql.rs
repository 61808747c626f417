use std::time::Instant;

use async_trait::async_trait;
use libsql::{Builder, Connection, Value};
use tokio::time::timeout;

use super::{CheckContext, CheckError, Checker};
use crate::conditions::{
    ConditionContext, ConditionExpressionGroup, ConditionVariable, DEFAULT_STRING_OPERATORS,
    evaluate_expression_group,
};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

const DEFAULT_QUERY: &str = "SELECT 1";

const SQL_VARIABLES: &[ConditionVariable] = &[ConditionVariable::new("result", DEFAULT_STRING_OPERATORS)];

/// Runs a query against a SQLite file or a remote libsql server
pub struct SqlChecker;

#[async_trait]
impl Checker for SqlChecker {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn condition_variables(&self) -> &'static [ConditionVariable] {
        SQL_VARIABLES
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let connection_string = monitor
            .target
            .database_connection_string
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no connection string configured"))?;
        let query = monitor
            .target
            .database_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_QUERY);
        let conditions = ConditionExpressionGroup::from_monitor(monitor)?;

        if let Some(path) = local_path(connection_string) {
            // Opening a missing file would create an empty database
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(CheckError::Failed(format!("Database file not found: {path}")));
            }
        }

        let start = Instant::now();
        let work = async {
            let conn = connect(connection_string, monitor.target.database_auth_token.clone()).await?;
            match &conditions {
                Some(_) => query_single_value(&conn, query).await.map(QueryResult::Value),
                None => count_rows(&conn, query).await.map(QueryResult::Rows),
            }
        };
        let result = timeout(ctx.timeout, work)
            .await
            .map_err(|_| CheckError::Timeout(ctx.timeout))?
            .map_err(|e| CheckError::Failed(format!("Database connection/query failed: {e}")))?;
        let ping = start.elapsed().as_millis() as u64;

        match (conditions, result) {
            (Some(conditions), QueryResult::Value(value)) => {
                let context = ConditionContext::new().with("result", value.clone());
                if evaluate_expression_group(&conditions, &context)? {
                    Ok(CheckOutcome::up("Query did meet specified conditions")
                        .with_ping(ping)
                        .with_response(value))
                } else {
                    Err(CheckError::Failed(format!("Query result did not meet the specified conditions ({value})")))
                }
            }
            (_, QueryResult::Rows(rows)) => Ok(CheckOutcome::up(format!("Rows: {rows}")).with_ping(ping)),
            (None, QueryResult::Value(value)) => Ok(CheckOutcome::up(value).with_ping(ping)),
        }
    }
}

enum QueryResult {
    Rows(usize),
    Value(String),
}

/// File path for local connection strings, `None` for remote ones
fn local_path(connection_string: &str) -> Option<&str> {
    if ["libsql://", "http://", "https://"].iter().any(|s| connection_string.starts_with(s)) {
        None
    } else {
        Some(connection_string.strip_prefix("file:").unwrap_or(connection_string))
    }
}

async fn connect(connection_string: &str, auth_token: Option<String>) -> Result<Connection, libsql::Error> {
    let database = match local_path(connection_string) {
        Some(path) => Builder::new_local(path).build().await?,
        None => {
            Builder::new_remote(connection_string.to_string(), auth_token.unwrap_or_default())
                .build()
                .await?
        }
    };
    database.connect()
}

async fn count_rows(conn: &Connection, query: &str) -> Result<usize, libsql::Error> {
    let mut rows = conn.query(query, ()).await?;
    let mut count = 0;
    while rows.next().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// First column of the first row, stringified
async fn query_single_value(conn: &Connection, query: &str) -> Result<String, libsql::Error> {
    let mut rows = conn.query(query, ()).await?;
    let row = rows.next().await?.ok_or(libsql::Error::QueryReturnedNoRows)?;
    Ok(value_to_string(row.get_value(0)?))
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}
