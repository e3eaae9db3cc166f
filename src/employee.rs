//! The `employee` table used by the basic sample: create, insert one row,
//! read it back.

use crate::core::db::{run_command, run_query, Executor, RowSet, SqlParam};
use crate::core::Result;
use tracing::info;

pub const DROP_TABLE_SQL: &str = "DROP TABLE IF EXISTS employee";
pub const CREATE_TABLE_SQL: &str =
    "CREATE TABLE employee (id int PRIMARY KEY, name varchar, age int, language varchar)";
pub const INSERT_SQL: &str = "INSERT INTO employee (id, name, age, language) VALUES ($1, $2, $3, $4)";
pub const SELECT_BY_ID_SQL: &str = "SELECT name, age, language FROM employee WHERE id = $1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    pub id: i32,
    pub name: String,
    pub age: i32,
    pub language: String,
}

impl Employee {
    pub fn new(id: i32, name: &str, age: i32, language: &str) -> Self {
        Employee {
            id,
            name: name.to_string(),
            age,
            language: language.to_string(),
        }
    }
}

/// The row the basic sample inserts.
pub fn demo_employee() -> Employee {
    Employee::new(1, "John", 35, "C")
}

/// Drops `employee` if it exists and creates it again.
pub fn create_table<E: Executor + ?Sized>(executor: &mut E) -> Result<()> {
    run_command(executor, "DROP TABLE", DROP_TABLE_SQL, &[])?;
    run_command(executor, "CREATE TABLE", CREATE_TABLE_SQL, &[])?;
    info!("created table employee");
    Ok(())
}

pub fn insert<E: Executor + ?Sized>(executor: &mut E, employee: &Employee) -> Result<()> {
    run_command(
        executor,
        "INSERT",
        INSERT_SQL,
        &[
            SqlParam::Int(employee.id),
            SqlParam::Text(&employee.name),
            SqlParam::Int(employee.age),
            SqlParam::Text(&employee.language),
        ],
    )?;
    Ok(())
}

pub fn select_by_id<E: Executor + ?Sized>(executor: &mut E, id: i32) -> Result<RowSet> {
    run_query(executor, "SELECT", SELECT_BY_ID_SQL, &[SqlParam::Int(id)])
}

/// Formats one result row the way the sample prints it: every field
/// followed by a space, NULL as an empty field.
pub fn render_query_row(fields: &[Option<String>]) -> String {
    let mut line = String::from("Query returned: ");
    for field in fields {
        line.push_str(field.as_deref().unwrap_or(""));
        line.push(' ');
    }
    line
}

/// Formats an insert confirmation, e.g. `Inserted data (1, 'John', 35, 'C')`.
pub fn render_inserted(employee: &Employee) -> String {
    format!(
        "Inserted data ({}, {}, {}, {})",
        employee.id,
        SqlParam::Text(&employee.name),
        employee.age,
        SqlParam::Text(&employee.language)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::CommandOutcome;
    use crate::core::YsqlError;
    use crate::test_utils::ScriptedExecutor;
    use postgres::error::SqlState;

    #[test]
    fn test_render_query_row() {
        let row = vec![Some("John".to_string()), Some("35".to_string()), Some("C".to_string())];
        assert_eq!(render_query_row(&row), "Query returned: John 35 C ");
        assert_eq!(render_query_row(&[None]), "Query returned:  ");
    }

    #[test]
    fn test_render_inserted() {
        assert_eq!(render_inserted(&demo_employee()), "Inserted data (1, 'John', 35, 'C')");
    }

    #[test]
    fn test_sample_statement_sequence() {
        let returned = RowSet::new(
            vec!["name".into(), "age".into(), "language".into()],
            vec![vec![Some("John".into()), Some("35".into()), Some("C".into())]],
        );
        let mut executor = ScriptedExecutor::new()
            .then_complete(0)
            .then_complete(0)
            .then_complete(1)
            .then_rows(returned.clone());

        create_table(&mut executor).unwrap();
        insert(&mut executor, &demo_employee()).unwrap();
        let rows = select_by_id(&mut executor, 1).unwrap();

        assert_eq!(rows, returned);
        assert_eq!(
            executor.statements(),
            vec![DROP_TABLE_SQL, CREATE_TABLE_SQL, INSERT_SQL, SELECT_BY_ID_SQL]
        );
        assert_eq!(executor.params(2), "1, 'John', 35, 'C'");
    }

    #[test]
    fn test_create_table_failure_stops_setup() {
        let mut executor = ScriptedExecutor::new()
            .then_complete(0)
            .then_fail(SqlState::INSUFFICIENT_PRIVILEGE, "permission denied for schema public");

        match create_table(&mut executor).unwrap_err() {
            YsqlError::Statement { context, message, .. } => {
                assert_eq!(context, "CREATE TABLE");
                assert!(message.contains("permission denied"));
            }
            other => panic!("Expected Statement error, got {:?}", other),
        }
        assert_eq!(executor.statements().len(), 2);
    }

    #[test]
    fn test_select_requires_rows() {
        let mut executor = ScriptedExecutor::new().then(Ok(CommandOutcome::Completed(0)));
        assert!(select_by_id(&mut executor, 1).is_err());
    }
}
