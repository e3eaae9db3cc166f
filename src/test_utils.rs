/// # Test Utilities Module
///
/// In-memory stand-ins for a database session, used by unit tests and by the
/// property tests under `tests/`.
///
/// - `LedgerExecutor` models the `accounts` table with transaction semantics
///   close to the server's: a failing statement aborts the open transaction,
///   a failed COMMIT rolls it back, ROLLBACK restores the snapshot taken at
///   BEGIN.
/// - `ScriptedExecutor` replays canned results and records what it was asked
///   to run.

use crate::accounts::{self, Account};
use crate::core::db::{CommandOutcome, CommandResult, DbFailure, Executor, RowSet, SqlParam};
use crate::transfer::{BEGIN_SQL, COMMIT_SQL, CREDIT_SQL, DEBIT_SQL, ROLLBACK_SQL};
use postgres::error::SqlState;
use std::collections::{BTreeMap, VecDeque};

/// A failure to inject into `LedgerExecutor`.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// SQLSTATE 40001
    SerializationFailure,
    /// Any other server error
    Sql(SqlState),
    /// A client-side failure without a SQL state, such as a dropped socket
    Connection,
}

impl FailureKind {
    fn to_failure(&self) -> DbFailure {
        match self {
            FailureKind::SerializationFailure => DbFailure::new(
                Some(SqlState::T_R_SERIALIZATION_FAILURE),
                "could not serialize access due to concurrent update",
            ),
            FailureKind::Sql(code) => {
                DbFailure::new(Some(code.clone()), format!("injected failure {}", code.code()))
            }
            FailureKind::Connection => DbFailure::new(None, "connection closed"),
        }
    }
}

#[derive(Debug)]
struct Injection {
    sql: String,
    kind: FailureKind,
    /// `None` fails every time
    remaining: Option<u32>,
}

type Table = BTreeMap<i32, Account>;

/// In-memory `accounts` table that understands the statements issued by
/// `accounts` and `transfer`.
#[derive(Debug)]
pub struct LedgerExecutor {
    table: Option<Table>,
    /// State at BEGIN, present while a transaction is open
    snapshot: Option<Option<Table>>,
    aborted: bool,
    injections: Vec<Injection>,
    log: Vec<String>,
}

impl Default for LedgerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerExecutor {
    /// Creates a ledger with an empty, already existing `accounts` table.
    pub fn new() -> Self {
        LedgerExecutor {
            table: Some(Table::new()),
            snapshot: None,
            aborted: false,
            injections: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Adds an account directly, bypassing the statement log.
    pub fn seed(&mut self, name: &str, balance: i32) {
        let table = self.table.get_or_insert_with(Table::new);
        let id = table.keys().next_back().map_or(1, |last| last + 1);
        table.insert(id, Account::new(id, name, 30, "USA", balance));
    }

    /// Makes every execution of `sql` fail.
    pub fn fail_on(&mut self, sql: &str, kind: FailureKind) {
        self.injections.push(Injection {
            sql: sql.to_string(),
            kind,
            remaining: None,
        });
    }

    /// Makes the next `times` executions of `sql` fail.
    pub fn fail_times(&mut self, sql: &str, kind: FailureKind, times: u32) {
        self.injections.push(Injection {
            sql: sql.to_string(),
            kind,
            remaining: Some(times),
        });
    }

    /// Committed or in-flight balance of the first account with this name.
    pub fn balance(&self, name: &str) -> Option<i32> {
        self.table
            .as_ref()?
            .values()
            .find(|a| a.name == name)
            .map(|a| a.balance)
    }

    pub fn total(&self) -> i64 {
        self.table
            .as_ref()
            .map_or(0, |t| t.values().map(|a| i64::from(a.balance)).sum())
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Every statement issued so far, in order.
    pub fn statements(&self) -> Vec<&str> {
        self.log.iter().map(String::as_str).collect()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.log.iter().filter(|s| s.as_str() == sql).count()
    }

    fn injected(&mut self, sql: &str) -> Option<DbFailure> {
        let injection = self.injections.iter_mut().find(|i| {
            i.sql == sql && i.remaining.map_or(true, |remaining| remaining > 0)
        })?;
        if let Some(remaining) = injection.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(injection.kind.to_failure())
    }

    fn restore_snapshot(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.table = snapshot;
        }
        self.aborted = false;
    }

    fn fail(&mut self, failure: DbFailure, sql: &str) -> CommandResult {
        if self.in_transaction() {
            if sql == COMMIT_SQL {
                self.restore_snapshot();
            } else {
                self.aborted = true;
            }
        }
        Err(failure)
    }

    fn table_mut(&mut self) -> Result<&mut Table, DbFailure> {
        self.table.as_mut().ok_or_else(|| {
            DbFailure::new(
                Some(SqlState::UNDEFINED_TABLE),
                "relation \"accounts\" does not exist",
            )
        })
    }

    fn adjust(&mut self, params: &[SqlParam<'_>], sign: i32) -> Result<u64, DbFailure> {
        let (amount, name) = match params {
            [SqlParam::Int(amount), SqlParam::Text(name)] => (*amount, *name),
            _ => return Err(bad_params()),
        };
        let mut updated = Vec::new();
        for account in self.table_mut()?.values() {
            if account.name == name {
                let balance = amount
                    .checked_mul(sign)
                    .and_then(|delta| account.balance.checked_add(delta))
                    .ok_or_else(|| {
                        DbFailure::new(
                            Some(SqlState::NUMERIC_VALUE_OUT_OF_RANGE),
                            "integer out of range",
                        )
                    })?;
                updated.push((account.id, balance));
            }
        }
        let table = self.table_mut()?;
        for (id, balance) in &updated {
            if let Some(account) = table.get_mut(id) {
                account.balance = *balance;
            }
        }
        Ok(updated.len() as u64)
    }

    fn insert(&mut self, params: &[SqlParam<'_>]) -> Result<u64, DbFailure> {
        let account = match params {
            [SqlParam::Int(id), SqlParam::Text(name), SqlParam::Int(age), SqlParam::Text(country), SqlParam::Int(balance)] => {
                Account::new(*id, name, *age, country, *balance)
            }
            _ => return Err(bad_params()),
        };
        let table = self.table_mut()?;
        if table.contains_key(&account.id) {
            return Err(DbFailure::new(
                Some(SqlState::UNIQUE_VIOLATION),
                "duplicate key value violates unique constraint \"accounts_pkey\"",
            ));
        }
        table.insert(account.id, account);
        Ok(1)
    }

    fn select_all(&mut self) -> Result<RowSet, DbFailure> {
        let table = self.table_mut()?;
        let columns = ["id", "name", "age", "country", "balance"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let rows = table
            .values()
            .map(|a| {
                vec![
                    Some(a.id.to_string()),
                    Some(a.name.clone()),
                    Some(a.age.to_string()),
                    Some(a.country.clone()),
                    Some(a.balance.to_string()),
                ]
            })
            .collect();
        Ok(RowSet::new(columns, rows))
    }

    fn dispatch(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        match sql {
            BEGIN_SQL => {
                if self.snapshot.is_none() {
                    self.snapshot = Some(self.table.clone());
                }
                Ok(CommandOutcome::Completed(0))
            }
            COMMIT_SQL => {
                if self.aborted {
                    self.restore_snapshot();
                } else {
                    self.snapshot = None;
                }
                Ok(CommandOutcome::Completed(0))
            }
            ROLLBACK_SQL => {
                self.restore_snapshot();
                Ok(CommandOutcome::Completed(0))
            }
            DEBIT_SQL => self.adjust(params, -1).map(CommandOutcome::Completed),
            CREDIT_SQL => self.adjust(params, 1).map(CommandOutcome::Completed),
            accounts::DROP_TABLE_SQL => {
                self.table = None;
                Ok(CommandOutcome::Completed(0))
            }
            accounts::CREATE_TABLE_SQL => {
                if self.table.is_some() {
                    return Err(DbFailure::new(
                        Some(SqlState::DUPLICATE_TABLE),
                        "relation \"accounts\" already exists",
                    ));
                }
                self.table = Some(Table::new());
                Ok(CommandOutcome::Completed(0))
            }
            accounts::INSERT_SQL => self.insert(params).map(CommandOutcome::Completed),
            accounts::SELECT_ALL_SQL => self.select_all().map(CommandOutcome::Rows),
            other => Err(DbFailure::new(
                Some(SqlState::SYNTAX_ERROR),
                format!("statement not understood by the ledger: {}", other),
            )),
        }
    }

    fn run(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        self.log.push(sql.to_string());

        if let Some(failure) = self.injected(sql) {
            return self.fail(failure, sql);
        }
        if self.aborted && sql != ROLLBACK_SQL && sql != COMMIT_SQL {
            return Err(DbFailure::new(
                Some(SqlState::IN_FAILED_SQL_TRANSACTION),
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        match self.dispatch(sql, params) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => self.fail(failure, sql),
        }
    }
}

impl Executor for LedgerExecutor {
    fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        self.run(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        self.run(sql, params)
    }
}

fn bad_params() -> DbFailure {
    DbFailure::new(
        Some(SqlState::INVALID_PARAMETER_VALUE),
        "unexpected statement parameters",
    )
}

/// Replays queued results in order and records each statement with its
/// parameters.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: VecDeque<CommandResult>,
    log: Vec<(String, String)>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, result: CommandResult) -> Self {
        self.responses.push_back(result);
        self
    }

    pub fn then_complete(self, affected: u64) -> Self {
        self.then(Ok(CommandOutcome::Completed(affected)))
    }

    pub fn then_rows(self, rows: RowSet) -> Self {
        self.then(Ok(CommandOutcome::Rows(rows)))
    }

    pub fn then_fail(self, code: SqlState, message: &str) -> Self {
        self.then(Err(DbFailure::new(Some(code), message)))
    }

    pub fn statements(&self) -> Vec<&str> {
        self.log.iter().map(|(sql, _)| sql.as_str()).collect()
    }

    /// Parameters of the `index`th statement, rendered and comma separated.
    pub fn params(&self, index: usize) -> &str {
        self.log.get(index).map_or("", |(_, params)| params.as_str())
    }

    fn next(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        let rendered = params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.log.push((sql.to_string(), rendered));
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(DbFailure::new(None, "no scripted response left")))
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        self.next(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> CommandResult {
        self.next(sql, params)
    }
}
