use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::Dialect;
use crate::error::DriverError;
use crate::task::TaskContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    pub values: Vec<String>,
}

impl QueryRow {
    #[must_use]
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

/// A live connection handle. Opening is lazy; network I/O starts with the first call.
///
/// Cancellation and deadlines work by dropping the in-flight call, so implementations
/// do not need to poll `ctx`. A call that cannot be dropped mid-flight only loses its result.
#[async_trait]
pub trait DatabaseHandle: Send + Sync + fmt::Debug {
    async fn ping(&self, ctx: &TaskContext) -> Result<(), DriverError>;

    async fn query(&self, ctx: &TaskContext, sql: &str) -> Result<QueryResult, DriverError>;

    fn close(&self);
}

pub type SharedHandle = Arc<dyn DatabaseHandle>;

pub trait DatabaseDriver: Send + Sync {
    fn open(&self, dialect: Dialect, connection_string: &str) -> Result<SharedHandle, DriverError>;
}
