// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pool integration for the embedded sqlite driver.

use crate::{db::{operation::BlockingDriver, sqlite_driver::SqliteDriver},
            error::LoopError,
            pool::{connection_pool::{Connector, ManagedConnection},
                   pool_config::{DriverKind, PoolConfig}}};
use std::path::PathBuf;

impl ManagedConnection for SqliteDriver {
    fn is_alive(&mut self) -> bool { self.ping() }

    fn reset(&mut self) { self.rollback_open_transaction(); }
}

/// Opens one sqlite connection per pool slot, all against the same database
/// file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    database: PathBuf,
}

impl SqliteConnector {
    /// Build from a validated pool config; the driver must be `sqlite`.
    pub fn from_config(config: &PoolConfig) -> Result<Self, LoopError> {
        if config.validate()? != DriverKind::Sqlite {
            return Err(LoopError::invalid_configuration(
                "SqliteConnector requires driver = \"sqlite\"",
            ));
        }
        let database = config
            .database
            .clone()
            .ok_or_else(|| {
                LoopError::invalid_configuration("sqlite requires the database field")
            })?;
        Ok(SqliteConnector {
            database: PathBuf::from(database),
        })
    }
}

impl Connector for SqliteConnector {
    type Conn = SqliteDriver;

    fn connect(&self) -> Result<SqliteDriver, LoopError> {
        if self.database.as_os_str() == ":memory:" {
            SqliteDriver::open_in_memory()
        } else {
            SqliteDriver::open(&self.database)
        }
    }
}
