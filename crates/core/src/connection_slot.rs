use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::browser::{Browser, SlotId};
use crate::catalog::CatalogEntry;
use crate::driver::{DatabaseDriver, SharedHandle};
use crate::error::{SlotError, TaskError};
use crate::object_slot::ObjectSlot;
use crate::profiles::ConnectionConfig;
use crate::task::{TaskContext, TaskId, TaskSlot, TaskSpawner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Disconnected,
    Connecting,
    Listing,
    Ready,
    Error(String),
}

impl SlotStatus {
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Connecting | Self::Listing)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Listing => f.write_str("listing"),
            Self::Ready => f.write_str("ready"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionSlot {
    id: SlotId,
    config: Arc<ConnectionConfig>,
    live_handle: Option<SharedHandle>,
    tasks: TaskSlot,
    status: SlotStatus,
    databases: Vec<CatalogEntry>,
    objects: BTreeMap<String, ObjectSlot>,
    selected_database: Option<String>,
}

impl ConnectionSlot {
    #[must_use]
    pub fn new(id: SlotId, config: ConnectionConfig) -> Self {
        Self {
            id,
            config: Arc::new(config),
            live_handle: None,
            tasks: TaskSlot::default(),
            status: SlotStatus::Disconnected,
            databases: Vec::new(),
            objects: BTreeMap::new(),
            selected_database: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> &SlotStatus {
        &self.status
    }

    #[must_use]
    pub fn databases(&self) -> &[CatalogEntry] {
        &self.databases
    }

    #[must_use]
    pub fn selected_database(&self) -> Option<&str> {
        self.selected_database.as_deref()
    }

    #[must_use]
    pub fn object(&self, database: &str) -> Option<&ObjectSlot> {
        self.objects.get(database)
    }

    #[must_use]
    pub fn selected_object(&self) -> Option<&ObjectSlot> {
        self.selected_database
            .as_deref()
            .and_then(|database| self.objects.get(database))
    }

    #[must_use]
    pub fn has_live_handle(&self) -> bool {
        self.live_handle.is_some()
    }

    #[must_use]
    pub fn has_pending_task(&self) -> bool {
        self.tasks.is_pending()
    }

    pub(crate) fn object_mut(&mut self, database: &str) -> Option<&mut ObjectSlot> {
        self.objects.get_mut(database)
    }

    pub(crate) fn connect(
        &mut self,
        driver: &dyn DatabaseDriver,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<(), SlotError> {
        if !self.status.can_start() {
            return Err(SlotError::IllegalTransition {
                action: "connect",
                status: self.status.clone(),
            });
        }
        if self.tasks.is_pending() {
            return Err(SlotError::Busy);
        }
        self.close_handle();

        let connection_string = self
            .config
            .connection_string(self.config.database.as_deref());
        let handle = match driver.open(self.config.dialect, &connection_string) {
            Ok(handle) => handle,
            Err(error) => {
                let error = TaskError::from(error);
                tracing::warn!(slot = %self.id, %error, "failed to open connection");
                self.status = SlotStatus::Error(error.describe("opening connection"));
                return Ok(());
            }
        };

        let id = self.id;
        let catalog = self.config.dialect.catalog();
        let progress = spawner.updates().clone();
        let worker_handle = Arc::clone(&handle);
        let token = spawner.spawn(
            "listing databases",
            move |ctx: TaskContext| async move {
                worker_handle.ping(&ctx).await?;
                let task = ctx.id();
                let _ = progress.enqueue(move |browser: &mut Browser| {
                    browser.apply_connection_progress(id, task);
                });
                let result = worker_handle.query(&ctx, catalog.list_databases).await?;
                Ok::<_, TaskError>(catalog.shape_databases(&result.rows))
            },
            move |browser: &mut Browser, task, outcome| {
                browser.apply_database_listing(id, task, outcome);
            },
        );

        tracing::info!(slot = %self.id, name = %self.config.name, task = %token.id(), "connecting");
        self.tasks.attach(token);
        self.live_handle = Some(handle);
        self.status = SlotStatus::Connecting;
        Ok(())
    }

    pub(crate) fn mark_listing(&mut self, task: TaskId) {
        if self.tasks.pending_id() == Some(task) && self.status == SlotStatus::Connecting {
            self.status = SlotStatus::Listing;
        }
    }

    pub(crate) fn finish_listing(
        &mut self,
        task: TaskId,
        outcome: Result<Vec<CatalogEntry>, TaskError>,
    ) -> bool {
        if let Err(stale) = self.tasks.settle(task) {
            tracing::debug!(slot = %self.id, %task, %stale, "dropping database listing");
            return false;
        }

        match outcome {
            Ok(databases) => {
                tracing::info!(slot = %self.id, count = databases.len(), "databases listed");
                self.databases = databases;
                self.status = SlotStatus::Ready;
                if let Some(fixed) = self.config.database.clone() {
                    if self.databases.iter().any(|entry| entry.name == fixed) {
                        self.prepare_object(&fixed);
                        self.selected_database = Some(fixed);
                    }
                }
                true
            }
            Err(error) => {
                tracing::warn!(slot = %self.id, %error, "listing databases failed");
                self.close_handle();
                self.status = SlotStatus::Error(error.describe("listing databases"));
                false
            }
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.tasks.cancel()
    }

    pub(crate) fn disconnect(&mut self) -> Result<(), SlotError> {
        if !self.status.is_ready() {
            return Err(SlotError::IllegalTransition {
                action: "disconnect",
                status: self.status.clone(),
            });
        }
        self.shutdown();
        tracing::info!(slot = %self.id, "disconnected");
        Ok(())
    }

    pub(crate) fn shutdown(&mut self) {
        self.tasks.abandon();
        for object in self.objects.values_mut() {
            object.close();
        }
        self.objects.clear();
        self.databases.clear();
        self.selected_database = None;
        self.close_handle();
        self.status = SlotStatus::Disconnected;
    }

    pub(crate) fn select_database(
        &mut self,
        database: &str,
        driver: &dyn DatabaseDriver,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<bool, SlotError> {
        if !self.status.is_ready() {
            return Err(SlotError::IllegalTransition {
                action: "select a database",
                status: self.status.clone(),
            });
        }
        if !self.databases.iter().any(|entry| entry.name == database) {
            return Err(SlotError::UnknownDatabase(database.to_string()));
        }

        self.selected_database = Some(database.to_string());
        let object = self.prepare_object(database);
        if object.needs_init() {
            object.init(driver, spawner)?;
        }
        Ok(object.has_pending_task() && object.status().is_in_flight())
    }

    fn prepare_object(&mut self, database: &str) -> &mut ObjectSlot {
        let id = self.id;
        let config = Arc::clone(&self.config);
        self.objects
            .entry(database.to_string())
            .or_insert_with(|| ObjectSlot::new(id, config, database))
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.live_handle.take() {
            handle.close();
            tracing::debug!(slot = %self.id, "connection handle closed");
        }
    }
}
