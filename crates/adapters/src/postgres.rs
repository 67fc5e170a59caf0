use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dbrowse_core::driver::{DatabaseHandle, QueryResult, QueryRow};
use dbrowse_core::error::DriverError;
use dbrowse_core::task::TaskContext;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::Handle;

const MAX_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct PostgresHandle {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresHandle {
    pub fn open(runtime: &Handle, connection_string: &str) -> Result<Self, DriverError> {
        let options = PgConnectOptions::from_str(connection_string)
            .map_err(|error| DriverError::connect(error.to_string()))?;
        let _entered = runtime.enter();
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);
        Ok(Self {
            pool,
            runtime: runtime.clone(),
        })
    }
}

#[async_trait]
impl DatabaseHandle for PostgresHandle {
    async fn ping(&self, _ctx: &TaskContext) -> Result<(), DriverError> {
        let mut connection = self.pool.acquire().await.map_err(to_driver_error)?;
        connection.ping().await.map_err(to_driver_error)
    }

    async fn query(&self, _ctx: &TaskContext, sql: &str) -> Result<QueryResult, DriverError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(to_driver_error)?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(QueryResult {
            columns,
            rows: rows.iter().map(convert_row).collect(),
        })
    }

    fn close(&self) {
        let pool = self.pool.clone();
        self.runtime.spawn(async move {
            pool.close().await;
            tracing::debug!("postgres pool closed");
        });
    }
}

fn convert_row(row: &PgRow) -> QueryRow {
    QueryRow::new(
        row.columns()
            .iter()
            .map(|column| cell_to_string(row, column))
            .collect(),
    )
}

fn cell_to_string(row: &PgRow, column: &PgColumn) -> String {
    let index = column.ordinal();
    if row.try_get_raw(index).map_or(true, |raw| raw.is_null()) {
        return "NULL".to_string();
    }

    let type_name = column.type_info().name();
    let decoded = match type_name {
        "BOOL" => row.try_get::<bool, _>(index).map(|value| value.to_string()),
        "INT2" => row.try_get::<i16, _>(index).map(|value| value.to_string()),
        "INT4" => row.try_get::<i32, _>(index).map(|value| value.to_string()),
        "INT8" => row.try_get::<i64, _>(index).map(|value| value.to_string()),
        "FLOAT4" => row.try_get::<f32, _>(index).map(|value| value.to_string()),
        "FLOAT8" => row.try_get::<f64, _>(index).map(|value| value.to_string()),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(|bytes| hex(&bytes)),
        _ => row.try_get::<String, _>(index),
    };
    decoded.unwrap_or_else(|_| format!("<{}>", type_name.to_ascii_lowercase()))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn to_driver_error(error: sqlx::Error) -> DriverError {
    if matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
    ) {
        DriverError::connect(error.to_string())
    } else {
        DriverError::query(error.to_string())
    }
}
