/// Query Execution Module
///
/// This module defines the statement-execution seam used by every sample
/// routine: the `Executor` trait, the shape of a statement's outcome, and
/// helpers that turn an outcome of the wrong shape into an error.

use crate::core::{Result, YsqlError};
use postgres::error::SqlState;
use postgres::types::ToSql;
use std::fmt;

/// A typed statement parameter.
///
/// Statements are written as templates with `$1`, `$2`, ... placeholders and
/// their values are passed separately, never spliced into the SQL text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlParam<'a> {
    Int(i32),
    Text(&'a str),
}

impl<'a> SqlParam<'a> {
    /// Borrows the parameter as a driver value.
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Int(value) => value,
            SqlParam::Text(value) => value,
        }
    }
}

impl fmt::Display for SqlParam<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Int(value) => write!(f, "{}", value),
            SqlParam::Text(value) => write!(f, "'{}'", value),
        }
    }
}

/// Rows returned by a statement, with every field rendered as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Column names from the query result
    pub columns: Vec<String>,
    /// Rows of data; SQL NULL is `None`
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowSet {
    /// Creates a new RowSet from column names and row data
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        RowSet { columns, rows }
    }

    /// Number of rows returned
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the field at `row`/`column`, or `None` when it is out of range
    /// or SQL NULL.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }
}

/// The successful outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The statement returned a row set (possibly empty)
    Rows(RowSet),
    /// The statement completed without returning rows; carries the number of
    /// rows it affected
    Completed(u64),
}

impl CommandOutcome {
    /// Requires a command-completion status, as for DDL, DML and transaction
    /// control statements.
    ///
    /// # Errors
    ///
    /// Returns `YsqlError::Statement` if the statement returned rows instead.
    pub fn expect_command(self, context: &str) -> Result<u64> {
        match self {
            CommandOutcome::Completed(affected) => Ok(affected),
            CommandOutcome::Rows(rows) => Err(YsqlError::Statement {
                context: context.to_string(),
                code: None,
                message: format!(
                    "expected a command status but the statement returned {} rows",
                    rows.row_count()
                ),
            }),
        }
    }

    /// Requires a row set, as for SELECT.
    ///
    /// # Errors
    ///
    /// Returns `YsqlError::Statement` if the statement only reported completion.
    pub fn expect_rows(self, context: &str) -> Result<RowSet> {
        match self {
            CommandOutcome::Rows(rows) => Ok(rows),
            CommandOutcome::Completed(_) => Err(YsqlError::Statement {
                context: context.to_string(),
                code: None,
                message: "expected rows but the statement returned a command status".to_string(),
            }),
        }
    }
}

/// A failed statement as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DbFailure {
    /// SQL state code, when the server sent one. Client-side failures such as
    /// a dropped socket have none.
    pub code: Option<SqlState>,
    /// The driver's error message
    pub message: String,
}

impl DbFailure {
    pub fn new(code: Option<SqlState>, message: impl Into<String>) -> Self {
        DbFailure {
            code,
            message: message.into(),
        }
    }

    /// Whether the server aborted the statement with a serialization failure.
    pub fn is_serialization_failure(&self) -> bool {
        self.code.as_ref() == Some(&SqlState::T_R_SERIALIZATION_FAILURE)
    }

    /// Converts the failure into a plain statement error.
    pub fn into_statement_error(self, context: &str) -> YsqlError {
        YsqlError::Statement {
            context: context.to_string(),
            code: self.code,
            message: self.message,
        }
    }
}

impl From<postgres::Error> for DbFailure {
    fn from(err: postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        DbFailure {
            code: err.code().cloned(),
            message,
        }
    }
}

impl fmt::Display for DbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code.code()),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of a statement: its successful shape, or the driver failure.
pub type CommandResult = std::result::Result<CommandOutcome, DbFailure>;

/// Something that can run one statement at a time against a database.
///
/// Statements are issued serially; an implementation never has more than one
/// statement in flight.
pub trait Executor {
    /// Runs a statement.
    ///
    /// Without parameters the statement may return rows or a completion
    /// status. With parameters it must not return rows; use `query` for
    /// parameterized SELECTs.
    fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult;

    /// Runs a row-returning statement, with or without parameters.
    fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult;
}

/// Runs a statement that must complete without returning rows.
pub fn run_command<E: Executor + ?Sized>(
    executor: &mut E,
    context: &str,
    sql: &str,
    params: &[SqlParam<'_>],
) -> Result<u64> {
    executor
        .execute(sql, params)
        .map_err(|failure| failure.into_statement_error(context))?
        .expect_command(context)
}

/// Runs a statement that must return a row set.
pub fn run_query<E: Executor + ?Sized>(
    executor: &mut E,
    context: &str,
    sql: &str,
    params: &[SqlParam<'_>],
) -> Result<RowSet> {
    executor
        .query(sql, params)
        .map_err(|failure| failure.into_statement_error(context))?
        .expect_rows(context)
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    /// SELECT statement
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// BEGIN/COMMIT/ROLLBACK transaction commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Determines the statement type from a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let sql_upper = sql.trim().to_uppercase();
        let keyword = sql_upper.split_whitespace().next().unwrap_or("");

        match keyword {
            "SELECT" => StatementType::Select,
            "INSERT" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "BEGIN" | "START" | "COMMIT" | "END" | "ROLLBACK" | "ABORT" => {
                StatementType::Transaction
            }
            _ => StatementType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Select => "select",
            StatementType::Insert => "insert",
            StatementType::Update => "update",
            StatementType::Delete => "delete",
            StatementType::Create => "create",
            StatementType::Drop => "drop",
            StatementType::Transaction => "transaction",
            StatementType::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_classification() {
        assert_eq!(StatementType::from_sql("SELECT * FROM accounts"), StatementType::Select);
        assert_eq!(
            StatementType::from_sql("INSERT INTO employee VALUES (1, 'John', 35, 'C')"),
            StatementType::Insert
        );
        assert_eq!(
            StatementType::from_sql("  update accounts SET balance = 0"),
            StatementType::Update
        );
        assert_eq!(StatementType::from_sql("DELETE FROM accounts WHERE id = 1"), StatementType::Delete);
        assert_eq!(StatementType::from_sql("CREATE TABLE t (id int)"), StatementType::Create);
        assert_eq!(StatementType::from_sql("DROP TABLE IF EXISTS t"), StatementType::Drop);
        assert_eq!(StatementType::from_sql("BEGIN"), StatementType::Transaction);
        assert_eq!(StatementType::from_sql("BEGIN TRANSACTION"), StatementType::Transaction);
        assert_eq!(StatementType::from_sql("COMMIT"), StatementType::Transaction);
        assert_eq!(StatementType::from_sql("ROLLBACK"), StatementType::Transaction);
        assert_eq!(StatementType::from_sql("SET search_path = public"), StatementType::Other);
        assert_eq!(StatementType::from_sql(""), StatementType::Other);
    }

    #[test]
    fn test_outcome_expectations() {
        assert_eq!(CommandOutcome::Completed(2).expect_command("UPDATE").unwrap(), 2);

        let rows = RowSet::new(
            vec!["name".to_string()],
            vec![vec![Some("John".to_string())]],
        );
        let err = CommandOutcome::Rows(rows.clone()).expect_command("INSERT").unwrap_err();
        match err {
            YsqlError::Statement { context, code, .. } => {
                assert_eq!(context, "INSERT");
                assert!(code.is_none());
            }
            other => panic!("Expected Statement error, got {:?}", other),
        }

        assert_eq!(CommandOutcome::Rows(rows.clone()).expect_rows("SELECT").unwrap(), rows);
        assert!(CommandOutcome::Completed(0).expect_rows("SELECT").is_err());
    }

    #[test]
    fn test_row_set_access() {
        let rows = RowSet::new(
            vec!["name".to_string(), "country".to_string()],
            vec![
                vec![Some("Jessica".to_string()), Some("USA".to_string())],
                vec![Some("John".to_string()), None],
            ],
        );
        assert_eq!(rows.row_count(), 2);
        assert_eq!(rows.value(0, 0), Some("Jessica"));
        assert_eq!(rows.value(1, 1), None);
        assert_eq!(rows.value(5, 0), None);
        assert!(RowSet::default().is_empty());
    }

    #[test]
    fn test_db_failure_classification() {
        let conflict = DbFailure::new(
            Some(SqlState::T_R_SERIALIZATION_FAILURE),
            "could not serialize access due to concurrent update",
        );
        assert!(conflict.is_serialization_failure());
        assert_eq!(
            conflict.to_string(),
            "could not serialize access due to concurrent update (SQLSTATE 40001)"
        );

        let duplicate = DbFailure::new(Some(SqlState::UNIQUE_VIOLATION), "duplicate key");
        assert!(!duplicate.is_serialization_failure());

        let io = DbFailure::new(None, "connection closed");
        assert!(!io.is_serialization_failure());
        assert_eq!(io.to_string(), "connection closed");

        match duplicate.into_statement_error("INSERT") {
            YsqlError::Statement { code, .. } => {
                assert_eq!(code, Some(SqlState::UNIQUE_VIOLATION));
            }
            other => panic!("Expected Statement error, got {:?}", other),
        }
    }

    #[test]
    fn test_param_display() {
        assert_eq!(SqlParam::Int(800).to_string(), "800");
        assert_eq!(SqlParam::Text("Jessica").to_string(), "'Jessica'");
    }
}
