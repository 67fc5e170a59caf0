//! Scripted in-memory driver for exercising slots without a database server.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::catalog::Dialect;
use crate::driver::{DatabaseDriver, DatabaseHandle, QueryResult, QueryRow, SharedHandle};
use crate::error::DriverError;
use crate::task::TaskContext;

#[derive(Debug, Clone)]
struct Reply {
    fragment: String,
    result: Result<QueryResult, DriverError>,
    gate: Option<Arc<Semaphore>>,
}

#[derive(Debug, Default)]
struct Script {
    replies: Vec<Reply>,
    ping_failure: Option<DriverError>,
    open_failure: Option<DriverError>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeDriver {
    script: Mutex<Script>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeDriver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, fragment: &str, rows: &[&[&str]]) {
        let rows = rows
            .iter()
            .map(|row| QueryRow::new(row.iter().map(|value| (*value).to_string()).collect()))
            .collect();
        self.push(
            fragment,
            Ok(QueryResult {
                columns: Vec::new(),
                rows,
            }),
            None,
        );
    }

    pub(crate) fn fail(&self, fragment: &str, error: DriverError) {
        self.push(fragment, Err(error), None);
    }

    pub(crate) fn gate(&self, fragment: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.push(fragment, Ok(QueryResult::default()), Some(Arc::clone(&gate)));
        gate
    }

    pub(crate) fn fail_ping(&self, error: DriverError) {
        self.lock_script().ping_failure = Some(error);
    }

    pub(crate) fn fail_open(&self, error: DriverError) {
        self.lock_script().open_failure = Some(error);
    }

    pub(crate) fn clear_failures(&self) {
        let mut script = self.lock_script();
        script.ping_failure = None;
        script.open_failure = None;
    }

    pub(crate) fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles
            .lock()
            .map(|handles| handles.clone())
            .unwrap_or_default()
    }

    pub(crate) fn opened(&self) -> usize {
        self.handles().len()
    }

    pub(crate) fn closed(&self) -> usize {
        self.handles().iter().map(|handle| handle.closes()).sum()
    }

    fn push(
        &self,
        fragment: &str,
        result: Result<QueryResult, DriverError>,
        gate: Option<Arc<Semaphore>>,
    ) {
        self.lock_script().replies.push(Reply {
            fragment: fragment.to_string(),
            result,
            gate,
        });
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn find(&self, sql: &str) -> Option<Reply> {
        self.lock_script()
            .replies
            .iter()
            .rev()
            .find(|reply| sql.contains(&reply.fragment))
            .cloned()
    }
}

impl DatabaseDriver for Arc<FakeDriver> {
    fn open(&self, dialect: Dialect, connection_string: &str) -> Result<SharedHandle, DriverError> {
        if let Some(error) = self.lock_script().open_failure.clone() {
            return Err(error);
        }
        let handle = Arc::new(FakeHandle {
            dialect,
            connection_string: connection_string.to_string(),
            driver: Arc::clone(self),
            queries: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        if let Ok(mut handles) = self.handles.lock() {
            handles.push(Arc::clone(&handle));
        }
        Ok(handle)
    }
}

pub(crate) struct FakeHandle {
    dialect: Dialect,
    connection_string: String,
    driver: Arc<FakeDriver>,
    queries: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl fmt::Debug for FakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeHandle")
            .field("dialect", &self.dialect)
            .field("connection_string", &self.connection_string)
            .field("closes", &self.closes())
            .finish_non_exhaustive()
    }
}

impl FakeHandle {
    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseHandle for FakeHandle {
    async fn ping(&self, _ctx: &TaskContext) -> Result<(), DriverError> {
        match self.driver.lock_script().ping_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn query(&self, _ctx: &TaskContext, sql: &str) -> Result<QueryResult, DriverError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
        let Some(reply) = self.driver.find(sql) else {
            return Ok(QueryResult::default());
        };
        if let Some(gate) = reply.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        reply.result
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
