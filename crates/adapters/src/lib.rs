use std::sync::Arc;

use dbrowse_core::catalog::Dialect;
use dbrowse_core::driver::{DatabaseDriver, SharedHandle};
use dbrowse_core::error::DriverError;
use tokio::runtime::Handle;

pub mod mysql;
pub mod postgres;
pub mod sqlserver;

#[derive(Debug, Clone)]
pub struct SqlDriver {
    runtime: Handle,
}

impl SqlDriver {
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl DatabaseDriver for SqlDriver {
    fn open(&self, dialect: Dialect, connection_string: &str) -> Result<SharedHandle, DriverError> {
        let handle: SharedHandle = match dialect {
            Dialect::Postgres => Arc::new(postgres::PostgresHandle::open(
                &self.runtime,
                connection_string,
            )?),
            Dialect::Mysql => Arc::new(mysql::MysqlHandle::open(
                &self.runtime,
                connection_string,
            )?),
            Dialect::SqlServer => Arc::new(sqlserver::SqlServerHandle::open(
                &self.runtime,
                connection_string,
            )?),
        };
        tracing::debug!(%dialect, "handle opened");
        Ok(handle)
    }
}
