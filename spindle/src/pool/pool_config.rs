// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pgsql sqlserver

//! Pool configuration with per-driver validation. Construction-time checks
//! only: a recognized driver name and that driver's required fields. An
//! invalid record fails synchronously, before any connection is attempted.

use crate::error::LoopError;
use serde::Deserialize;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DriverKind {
    MySql,
    PgSql,
    Sqlite,
    SqlServer,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolConfig {
    /// Driver name: `mysql`, `pgsql`, `sqlite`, or `sqlserver`.
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// For sqlite this is the database file path.
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pool bound; falls back to the loop's `db_pool_size` when absent.
    pub max_connections: Option<usize>,
}

impl PoolConfig {
    pub fn sqlite(database: impl Into<String>) -> Self {
        PoolConfig {
            driver: "sqlite".into(),
            database: Some(database.into()),
            ..Default::default()
        }
    }

    /// Check the driver name and its required fields. Returns the parsed
    /// driver kind.
    pub fn validate(&self) -> Result<DriverKind, LoopError> {
        let kind: DriverKind = self.driver.parse().map_err(|_| {
            LoopError::invalid_configuration(format!(
                "unrecognized driver {:?} (expected mysql, pgsql, sqlite, or sqlserver)",
                self.driver
            ))
        })?;

        let require = |field: &Option<String>, name: &str| {
            if field.as_deref().is_none_or(str::is_empty) {
                Err(LoopError::invalid_configuration(format!(
                    "driver {kind} requires the {name} field"
                )))
            } else {
                Ok(())
            }
        };

        match kind {
            DriverKind::MySql | DriverKind::PgSql => {
                require(&self.host, "host")?;
                require(&self.database, "database")?;
            }
            DriverKind::Sqlite => {
                require(&self.database, "database")?;
            }
            DriverKind::SqlServer => {
                require(&self.host, "host")?;
            }
        }
        if self.max_connections == Some(0) {
            return Err(LoopError::invalid_configuration(
                "max_connections must be at least 1",
            ));
        }
        Ok(kind)
    }
}
