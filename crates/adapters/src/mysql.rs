use async_trait::async_trait;
use dbrowse_core::driver::{DatabaseHandle, QueryResult, QueryRow};
use dbrowse_core::error::DriverError;
use dbrowse_core::task::TaskContext;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, Pool, Row, Value};
use tokio::runtime::Handle;

#[derive(Debug)]
pub struct MysqlHandle {
    pool: Pool,
    runtime: Handle,
}

impl MysqlHandle {
    pub fn open(runtime: &Handle, connection_string: &str) -> Result<Self, DriverError> {
        let opts = Opts::from_url(connection_string)
            .map_err(|error| DriverError::connect(error.to_string()))?;
        let _entered = runtime.enter();
        Ok(Self {
            pool: Pool::new(opts),
            runtime: runtime.clone(),
        })
    }
}

#[async_trait]
impl DatabaseHandle for MysqlHandle {
    async fn ping(&self, _ctx: &TaskContext) -> Result<(), DriverError> {
        let mut conn = self.pool.get_conn().await.map_err(to_driver_error)?;
        conn.ping().await.map_err(to_driver_error)
    }

    async fn query(&self, _ctx: &TaskContext, sql: &str) -> Result<QueryResult, DriverError> {
        let mut conn = self.pool.get_conn().await.map_err(to_driver_error)?;
        let mut result = conn.query_iter(sql).await.map_err(to_driver_error)?;
        let columns = result
            .columns_ref()
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect();
        let rows: Vec<Row> = result.collect().await.map_err(to_driver_error)?;
        drop(result);

        Ok(QueryResult {
            columns,
            rows: rows.into_iter().map(row_to_query_row).collect(),
        })
    }

    fn close(&self) {
        let pool = self.pool.clone();
        self.runtime.spawn(async move {
            if let Err(error) = pool.disconnect().await {
                tracing::debug!(%error, "mysql pool did not disconnect cleanly");
            }
        });
    }
}

fn row_to_query_row(row: Row) -> QueryRow {
    let values = row
        .unwrap()
        .into_iter()
        .map(mysql_value_to_string)
        .collect::<Vec<_>>();
    QueryRow::new(values)
}

fn mysql_value_to_string(value: Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if (hour, minute, second, micros) == (0, 0, 0, 0) {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            }
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

fn to_driver_error(error: mysql_async::Error) -> DriverError {
    match error {
        mysql_async::Error::Server(error) => DriverError::query(error.to_string()),
        other => DriverError::connect(other.to_string()),
    }
}
