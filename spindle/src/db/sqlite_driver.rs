// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words rusqlite rowid

//! Embedded blocking driver over rusqlite.
//!
//! Statements go through the connection's prepared-statement cache, so
//! prepare/execute round-trips and repeated queries reuse the compiled
//! form. SQLite permits exactly one writer, which matches the
//! one-connection-per-queue discipline here.

use crate::{db::operation::{BlockingDriver, DbPayload, DbResult, DbValue,
                            StatementId},
            error::LoopError};
use rusqlite::{params_from_iter,
               types::{ToSqlOutput, Value, ValueRef},
               Connection};
use std::{collections::HashMap, path::Path};

impl rusqlite::types::ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::Null => ToSqlOutput::Owned(Value::Null),
            DbValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            DbValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            DbValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            DbValue::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(value) => DbValue::Integer(value),
        ValueRef::Real(value) => DbValue::Real(value),
        ValueRef::Text(bytes) => {
            DbValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => DbValue::Blob(bytes.to_vec()),
    }
}

fn db_err(err: rusqlite::Error) -> LoopError { LoopError::database(err.to_string()) }

pub struct SqliteDriver {
    conn: Connection,
    /// Prepared statements are stored by SQL text; the connection's
    /// statement cache holds the compiled form.
    statements: HashMap<u64, String>,
    next_statement: u64,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("statements", &self.statements.len())
            .finish()
    }
}

impl SqliteDriver {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoopError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Ok(SqliteDriver {
            conn,
            statements: HashMap::new(),
            next_statement: 0,
        })
    }

    pub fn open_in_memory() -> Result<Self, LoopError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(SqliteDriver {
            conn,
            statements: HashMap::new(),
            next_statement: 0,
        })
    }

    fn run_sql(&mut self, sql: &str, params: &[DbValue]) -> Result<DbResult, LoopError> {
        let is_insert = sql.trim_start().get(..6).is_some_and(|prefix| {
            prefix.eq_ignore_ascii_case("insert")
        });
        let mut stmt = self.conn.prepare_cached(sql).map_err(db_err)?;
        if stmt.column_count() > 0 {
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let column_count = columns.len();
            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(db_err)?;
            let mut collected = vec![];
            while let Some(row) = rows.next().map_err(db_err)? {
                let mut values = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    values.push(value_from_ref(row.get_ref(index).map_err(db_err)?));
                }
                collected.push(values);
            }
            Ok(DbResult::Rows {
                columns,
                rows: collected,
            })
        } else {
            let affected = stmt
                .execute(params_from_iter(params.iter()))
                .map_err(db_err)?;
            drop(stmt);
            Ok(DbResult::Affected {
                affected_rows: affected as u64,
                insert_id: is_insert.then(|| self.conn.last_insert_rowid()),
            })
        }
    }
}

impl BlockingDriver for SqliteDriver {
    fn execute(&mut self, payload: &DbPayload) -> Result<DbResult, LoopError> {
        match payload {
            DbPayload::Query { sql, params } => self.run_sql(sql, params),
            DbPayload::Prepare { sql } => {
                // Compile now so syntax errors surface at prepare time.
                self.conn.prepare_cached(sql).map_err(db_err)?;
                self.next_statement += 1;
                let statement = StatementId(self.next_statement);
                self.statements.insert(statement.0, sql.clone());
                Ok(DbResult::Prepared { statement })
            }
            DbPayload::Execute { statement, params } => {
                let Some(sql) = self.statements.get(&statement.0).cloned() else {
                    return Err(LoopError::database(format!(
                        "unknown prepared statement id {}",
                        statement.0
                    )));
                };
                self.run_sql(&sql, params)
            }
            DbPayload::Begin => self
                .conn
                .execute_batch("BEGIN")
                .map(|()| DbResult::Done)
                .map_err(db_err),
            DbPayload::Commit => self
                .conn
                .execute_batch("COMMIT")
                .map(|()| DbResult::Done)
                .map_err(db_err),
            DbPayload::Rollback => self
                .conn
                .execute_batch("ROLLBACK")
                .map(|()| DbResult::Done)
                .map_err(db_err),
        }
    }

    fn ping(&mut self) -> bool {
        self.conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }

    fn rollback_open_transaction(&mut self) {
        // No-op when no transaction is open; sqlite reports an error we
        // deliberately swallow.
        drop(self.conn.execute_batch("ROLLBACK"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded_driver() -> SqliteDriver {
        let mut driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .execute(&DbPayload::Query {
                sql: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)".into(),
                params: vec![],
            })
            .unwrap();
        driver
    }

    #[test]
    fn test_insert_reports_affected_rows_and_insert_id() {
        let mut driver = seeded_driver();
        let result = driver
            .execute(&DbPayload::Query {
                sql: "INSERT INTO users (name) VALUES (?1)".into(),
                params: vec![DbValue::from("ada")],
            })
            .unwrap();
        assert_eq!(
            result,
            DbResult::Affected {
                affected_rows: 1,
                insert_id: Some(1),
            }
        );
    }

    #[test]
    fn test_select_returns_columns_and_rows_in_order() {
        let mut driver = seeded_driver();
        for name in ["ada", "grace"] {
            driver
                .execute(&DbPayload::Query {
                    sql: "INSERT INTO users (name) VALUES (?1)".into(),
                    params: vec![DbValue::from(name)],
                })
                .unwrap();
        }

        let result = driver
            .execute(&DbPayload::Query {
                sql: "SELECT id, name FROM users ORDER BY id".into(),
                params: vec![],
            })
            .unwrap();
        assert_eq!(
            result,
            DbResult::Rows {
                columns: vec!["id".into(), "name".into()],
                rows: vec![
                    vec![DbValue::Integer(1), DbValue::Text("ada".into())],
                    vec![DbValue::Integer(2), DbValue::Text("grace".into())],
                ],
            }
        );
    }

    #[test]
    fn test_prepare_execute_round_trip() {
        let mut driver = seeded_driver();
        let DbResult::Prepared { statement } = driver
            .execute(&DbPayload::Prepare {
                sql: "INSERT INTO users (name) VALUES (?1)".into(),
            })
            .unwrap()
        else {
            panic!("expected Prepared result");
        };

        let result = driver
            .execute(&DbPayload::Execute {
                statement,
                params: vec![DbValue::from("lin")],
            })
            .unwrap();
        assert!(matches!(result, DbResult::Affected { affected_rows: 1, .. }));
    }

    #[test]
    fn test_unknown_statement_is_a_database_error() {
        let mut driver = seeded_driver();
        let result = driver.execute(&DbPayload::Execute {
            statement: StatementId(99),
            params: vec![],
        });
        assert!(matches!(result, Err(LoopError::Database { .. })));
    }

    #[test]
    fn test_transaction_rollback_discards_writes() {
        let mut driver = seeded_driver();
        driver.execute(&DbPayload::Begin).unwrap();
        driver
            .execute(&DbPayload::Query {
                sql: "INSERT INTO users (name) VALUES ('ghost')".into(),
                params: vec![],
            })
            .unwrap();
        driver.execute(&DbPayload::Rollback).unwrap();

        let result = driver
            .execute(&DbPayload::Query {
                sql: "SELECT COUNT(*) AS n FROM users".into(),
                params: vec![],
            })
            .unwrap();
        assert_eq!(
            result,
            DbResult::Rows {
                columns: vec!["n".into()],
                rows: vec![vec![DbValue::Integer(0)]],
            }
        );
    }

    #[test]
    fn test_reset_rolls_back_open_transaction() {
        let mut driver = seeded_driver();
        driver.execute(&DbPayload::Begin).unwrap();
        driver
            .execute(&DbPayload::Query {
                sql: "INSERT INTO users (name) VALUES ('ghost')".into(),
                params: vec![],
            })
            .unwrap();

        driver.rollback_open_transaction();
        // Calling it again with no open transaction is harmless.
        driver.rollback_open_transaction();
        assert!(driver.ping());

        let result = driver
            .execute(&DbPayload::Query {
                sql: "SELECT COUNT(*) AS n FROM users".into(),
                params: vec![],
            })
            .unwrap();
        assert_eq!(
            result,
            DbResult::Rows {
                columns: vec!["n".into()],
                rows: vec![vec![DbValue::Integer(0)]],
            }
        );
    }
}
