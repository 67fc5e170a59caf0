use std::time::Duration;

use thiserror::Error;

use crate::connection_slot::SlotStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Connect,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
}

impl DriverError {
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Connect,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Query,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("cannot connect: {0}")]
    Connect(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Query(String),
    #[error("result superseded")]
    Stale,
}

impl TaskError {
    #[must_use]
    pub fn describe(&self, operation: &str) -> String {
        format!("{operation}: {self}")
    }
}

impl From<DriverError> for TaskError {
    fn from(error: DriverError) -> Self {
        match error.kind {
            DriverErrorKind::Connect => Self::Connect(error.message),
            DriverErrorKind::Query => Self::Query(error.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("cannot {action} while {status}")]
    IllegalTransition {
        action: &'static str,
        status: SlotStatus,
    },
    #[error("a background task is already running")]
    Busy,
    #[error("no connection with id {0}")]
    UnknownConnection(usize),
    #[error("database `{0}` is not listed")]
    UnknownDatabase(String),
    #[error("no catalog entry at row {0}")]
    UnknownEntry(usize),
    #[error("no result pane for `{0}`")]
    UnknownPane(String),
}
