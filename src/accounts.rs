//! The `accounts` table used by the transfer sample.

use crate::core::db::{run_command, run_query, Executor, RowSet, SqlParam};
use crate::core::{Result, YsqlError};
use tracing::info;

pub const DROP_TABLE_SQL: &str = "DROP TABLE IF EXISTS accounts";
pub const CREATE_TABLE_SQL: &str =
    "CREATE TABLE accounts (id int PRIMARY KEY, name varchar, age int, country varchar, balance int)";
pub const INSERT_SQL: &str =
    "INSERT INTO accounts (id, name, age, country, balance) VALUES ($1, $2, $3, $4, $5)";
pub const SELECT_ALL_SQL: &str = "SELECT id, name, age, country, balance FROM accounts ORDER BY id";

/// One row of the `accounts` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i32,
    pub name: String,
    pub age: i32,
    pub country: String,
    pub balance: i32,
}

impl Account {
    pub fn new(id: i32, name: &str, age: i32, country: &str, balance: i32) -> Self {
        Account {
            id,
            name: name.to_string(),
            age,
            country: country.to_string(),
            balance,
        }
    }

    /// Reads row `index` of a result laid out as `SELECT_ALL_SQL` returns it.
    pub fn from_row(rows: &RowSet, index: usize) -> Result<Self> {
        Ok(Account {
            id: int_field(rows, index, 0, "id")?,
            name: text_field(rows, index, 1),
            age: int_field(rows, index, 2, "age")?,
            country: text_field(rows, index, 3),
            balance: int_field(rows, index, 4, "balance")?,
        })
    }
}

/// The two accounts the transfer sample starts with.
pub fn demo_accounts() -> [Account; 2] {
    [
        Account::new(1, "Jessica", 28, "USA", 10000),
        Account::new(2, "John", 28, "Canada", 9000),
    ]
}

/// Drops `accounts` if it exists and creates it again, so setup can be
/// re-run against a database that already has the table.
pub fn create_table<E: Executor + ?Sized>(executor: &mut E) -> Result<()> {
    run_command(executor, "DROP TABLE", DROP_TABLE_SQL, &[])?;
    run_command(executor, "CREATE TABLE", CREATE_TABLE_SQL, &[])?;
    info!("created table accounts");
    Ok(())
}

pub fn insert<E: Executor + ?Sized>(executor: &mut E, account: &Account) -> Result<()> {
    run_command(
        executor,
        "INSERT",
        INSERT_SQL,
        &[
            SqlParam::Int(account.id),
            SqlParam::Text(&account.name),
            SqlParam::Int(account.age),
            SqlParam::Text(&account.country),
            SqlParam::Int(account.balance),
        ],
    )?;
    info!(id = account.id, name = %account.name, "inserted account");
    Ok(())
}

/// Returns the raw row set, ordered by id.
pub fn select_rows<E: Executor + ?Sized>(executor: &mut E) -> Result<RowSet> {
    run_query(executor, "SELECT", SELECT_ALL_SQL, &[])
}

/// Returns every account, ordered by id.
pub fn select_all<E: Executor + ?Sized>(executor: &mut E) -> Result<Vec<Account>> {
    let rows = select_rows(executor)?;
    (0..rows.row_count())
        .map(|index| Account::from_row(&rows, index))
        .collect()
}

pub fn total_balance(accounts: &[Account]) -> i64 {
    accounts.iter().map(|a| i64::from(a.balance)).sum()
}

fn text_field(rows: &RowSet, row: usize, column: usize) -> String {
    rows.value(row, column).unwrap_or_default().to_string()
}

fn int_field(rows: &RowSet, row: usize, column: usize, name: &str) -> Result<i32> {
    let raw = rows.value(row, column).ok_or_else(|| YsqlError::Statement {
        context: "SELECT".to_string(),
        code: None,
        message: format!("row {} has no value for {}", row, name),
    })?;
    raw.parse().map_err(|_| YsqlError::Statement {
        context: "SELECT".to_string(),
        code: None,
        message: format!("row {}: {} is not an integer: {:?}", row, name, raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::LedgerExecutor;
    use postgres::error::SqlState;

    #[test]
    fn test_setup_and_select() {
        let mut ledger = LedgerExecutor::new();
        create_table(&mut ledger).unwrap();
        for account in demo_accounts() {
            insert(&mut ledger, &account).unwrap();
        }

        let accounts = select_all(&mut ledger).unwrap();
        assert_eq!(accounts, demo_accounts().to_vec());
        assert_eq!(total_balance(&accounts), 19000);
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let mut ledger = LedgerExecutor::new();
        create_table(&mut ledger).unwrap();
        insert(&mut ledger, &demo_accounts()[0]).unwrap();

        create_table(&mut ledger).unwrap();
        assert!(select_all(&mut ledger).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_key_insert_fails() {
        let mut ledger = LedgerExecutor::new();
        create_table(&mut ledger).unwrap();
        insert(&mut ledger, &Account::new(1, "Jessica", 28, "USA", 10000)).unwrap();

        let err = insert(&mut ledger, &Account::new(1, "John", 28, "Canada", 9000)).unwrap_err();
        match err {
            YsqlError::Statement { context, code, .. } => {
                assert_eq!(context, "INSERT");
                assert_eq!(code, Some(SqlState::UNIQUE_VIOLATION));
            }
            other => panic!("Expected Statement error, got {:?}", other),
        }

        let accounts = select_all(&mut ledger).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Jessica");
    }

    #[test]
    fn test_from_row_rejects_bad_integers() {
        let rows = RowSet::new(
            vec!["id".into(), "name".into(), "age".into(), "country".into(), "balance".into()],
            vec![vec![
                Some("1".into()),
                Some("Jessica".into()),
                Some("28".into()),
                None,
                Some("lots".into()),
            ]],
        );
        match Account::from_row(&rows, 0) {
            Err(YsqlError::Statement { message, .. }) => assert!(message.contains("balance")),
            other => panic!("Expected Statement error, got {:?}", other),
        }
    }
}
