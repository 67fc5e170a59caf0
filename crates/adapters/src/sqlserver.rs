use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use dbrowse_core::driver::{DatabaseHandle, QueryResult, QueryRow};
use dbrowse_core::error::DriverError;
use dbrowse_core::task::TaskContext;
use futures_util::TryStreamExt;
use tiberius::{Client, ColumnData, Config, QueryItem};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type SqlClient = Client<Compat<TcpStream>>;

/// A single TDS client, connected on first use.
///
/// The client is checked out for the duration of each call. A call dropped halfway
/// (cancelled or timed out) drops the client with it, and the next call reconnects.
pub struct SqlServerHandle {
    config: Config,
    client: Arc<Mutex<Option<SqlClient>>>,
    runtime: Handle,
}

impl fmt::Debug for SqlServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlServerHandle")
            .field("addr", &self.config.get_addr())
            .finish_non_exhaustive()
    }
}

impl SqlServerHandle {
    pub fn open(runtime: &Handle, connection_string: &str) -> Result<Self, DriverError> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|error| DriverError::connect(error.to_string()))?;
        Ok(Self {
            config,
            client: Arc::new(Mutex::new(None)),
            runtime: runtime.clone(),
        })
    }

    async fn checkout(&self) -> Result<SqlClient, DriverError> {
        if let Some(client) = self.client.lock().await.take() {
            return Ok(client);
        }
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|error| DriverError::connect(error.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|error| DriverError::connect(error.to_string()))?;
        Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(to_driver_error)
    }

    async fn checkin(&self, client: SqlClient) {
        let mut slot = self.client.lock().await;
        if slot.is_none() {
            *slot = Some(client);
        }
    }
}

#[async_trait]
impl DatabaseHandle for SqlServerHandle {
    async fn ping(&self, _ctx: &TaskContext) -> Result<(), DriverError> {
        let mut client = self.checkout().await?;
        let outcome = match client.simple_query("select 1").await {
            Ok(stream) => stream.into_results().await.map(|_| ()),
            Err(error) => Err(error),
        };
        match outcome {
            Ok(()) => {
                self.checkin(client).await;
                Ok(())
            }
            Err(error) => Err(to_driver_error(error)),
        }
    }

    async fn query(&self, _ctx: &TaskContext, sql: &str) -> Result<QueryResult, DriverError> {
        let mut client = self.checkout().await?;
        let outcome = collect_first_result(&mut client, sql).await;
        if !matches!(&outcome, Err(tiberius::error::Error::Io { .. })) {
            self.checkin(client).await;
        }
        outcome.map_err(to_driver_error)
    }

    fn close(&self) {
        let client = Arc::clone(&self.client);
        self.runtime.spawn(async move {
            let Some(client) = client.lock().await.take() else {
                return;
            };
            if let Err(error) = client.close().await {
                tracing::debug!(%error, "sql server client did not close cleanly");
            }
        });
    }
}

async fn collect_first_result(
    client: &mut SqlClient,
    sql: &str,
) -> Result<QueryResult, tiberius::error::Error> {
    let mut stream = client.simple_query(sql).await?;
    let mut result = QueryResult::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                result.columns = meta
                    .columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect();
            }
            QueryItem::Row(row) if row.result_index() == 0 => {
                result
                    .rows
                    .push(QueryRow::new(row.into_iter().map(column_to_string).collect()));
            }
            QueryItem::Metadata(_) | QueryItem::Row(_) => {}
        }
    }
    Ok(result)
}

fn column_to_string(data: ColumnData<'static>) -> String {
    match data {
        ColumnData::U8(value) => display(value),
        ColumnData::I16(value) => display(value),
        ColumnData::I32(value) => display(value),
        ColumnData::I64(value) => display(value),
        ColumnData::F32(value) => display(value),
        ColumnData::F64(value) => display(value),
        ColumnData::Bit(value) => display(value),
        ColumnData::String(value) => display(value),
        ColumnData::Guid(value) => display(value),
        ColumnData::Numeric(value) => display(value),
        ColumnData::Binary(value) => value.map_or_else(|| "NULL".to_string(), |bytes| hex(&bytes)),
        other => format!("{other:?}"),
    }
}

fn display<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "NULL".to_string(), |value| value.to_string())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

fn to_driver_error(error: tiberius::error::Error) -> DriverError {
    match error {
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_) | tiberius::error::Error::Routing { .. } => {
            DriverError::connect(error.to_string())
        }
        other => DriverError::query(other.to_string()),
    }
}
