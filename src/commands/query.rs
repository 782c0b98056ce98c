//! Ad-hoc query entry point

use std::time::Instant;

use tracing::{field, instrument, warn};

use crate::activity::ActivityEntry;
use crate::commands::{resolve, CommandResponse};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::sql_safety;
use crate::engine::types::{QueryResult, Value};
use crate::AppState;

/// Runs one statement against `database`.
///
/// Read-only databases accept only statements the SQL parser classifies as
/// non-mutating; unparsable SQL is refused there. Mutations and every
/// failure are reported to the activity sink with their duration. Drops,
/// truncations, schema changes and unfiltered UPDATE/DELETE are labelled
/// `dangerous_query`.
#[instrument(
    skip(state, sql, params),
    fields(database = %database, sql_len = sql.len(), engine = field::Empty)
)]
pub async fn execute_query(
    state: &AppState,
    user: &str,
    database: &str,
    sql: &str,
    params: &[Value],
) -> CommandResponse<QueryResult> {
    let (config, driver) = match resolve(state, database).await {
        Ok(resolved) => resolved,
        Err(err) => return CommandResponse::failure(&err),
    };
    tracing::Span::current().record("engine", field::display(config.engine));

    let analysis = sql_safety::analyze_sql(config.engine, sql);
    let is_mutation = analysis
        .as_ref()
        .map(|a| a.is_mutation)
        .unwrap_or(true);
    let is_dangerous = analysis.as_ref().map(|a| a.is_dangerous).unwrap_or(false);
    let operation = if is_dangerous { "dangerous_query" } else { "query" };

    if config.read_only && is_mutation {
        let err = match &analysis {
            Ok(_) => EngineError::read_only(&config.name),
            Err(parse_err) => EngineError::ReadOnly {
                name: format!("{} (unclassifiable SQL: {})", config.name, parse_err),
            },
        };
        return CommandResponse::failure(&err);
    }

    let keyword = sql_safety::leading_keyword(sql);
    if is_dangerous {
        warn!(user, keyword = %keyword, "Running dangerous statement");
    }
    let start = Instant::now();
    let result: EngineResult<QueryResult> = driver.query(sql, params).await;
    let elapsed = start.elapsed().as_micros() as f64 / 1000.0;

    match result {
        Ok(mut result) => {
            result.execution_time_ms = elapsed;
            if is_mutation {
                let details = match result.affected_rows {
                    Some(affected) => format!("{} affected {} row(s)", keyword, affected),
                    None => format!("{} executed", keyword),
                };
                state.activity.log_activity(
                    ActivityEntry::new(user, database, operation, details)
                        .with_sql(sql)
                        .with_duration(elapsed),
                );
            }
            CommandResponse::ok(result)
        }
        Err(err) => {
            state.activity.log_activity(
                ActivityEntry::new(user, database, operation, format!("{} failed: {}", keyword, err))
                    .with_sql(sql)
                    .with_duration(elapsed)
                    .failed(),
            );
            CommandResponse::failure(&err)
        }
    }
}
