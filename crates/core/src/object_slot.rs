use std::collections::BTreeMap;
use std::sync::Arc;

use crate::browser::{Browser, SlotId};
use crate::catalog::{CatalogEntry, EntryKind, PREVIEW_ROW_LIMIT};
use crate::connection_slot::SlotStatus;
use crate::driver::{DatabaseDriver, QueryResult, SharedHandle};
use crate::error::{SlotError, TaskError};
use crate::profiles::ConnectionConfig;
use crate::task::{TaskContext, TaskId, TaskSlot, TaskSpawner};

pub const MAX_RESULT_ROWS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PaneKey {
    Editor,
    Relation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneStatus {
    Idle,
    Running,
    Ready(QueryResult),
    Error(String),
}

#[derive(Debug)]
pub struct ResultPane {
    sql: String,
    status: PaneStatus,
    tasks: TaskSlot,
}

impl ResultPane {
    fn new(sql: String) -> Self {
        Self {
            sql,
            status: PaneStatus::Idle,
            tasks: TaskSlot::default(),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn status(&self) -> &PaneStatus {
        &self.status
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.is_pending()
    }

    fn run(
        &mut self,
        handle: &SharedHandle,
        target: PaneTarget,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<(), SlotError> {
        if self.tasks.is_pending() {
            return Err(SlotError::Busy);
        }

        let handle = Arc::clone(handle);
        let sql = self.sql.clone();
        let token = spawner.spawn(
            "running query",
            move |ctx: TaskContext| async move {
                let mut result = handle.query(&ctx, &sql).await?;
                result.rows.truncate(MAX_RESULT_ROWS);
                Ok::<_, TaskError>(result)
            },
            move |browser: &mut Browser, task, outcome| {
                browser.apply_pane_result(&target, task, outcome);
            },
        );
        self.tasks.attach(token);
        self.status = PaneStatus::Running;
        Ok(())
    }

    pub(crate) fn finish(&mut self, task: TaskId, outcome: Result<QueryResult, TaskError>) {
        if let Err(stale) = self.tasks.settle(task) {
            tracing::debug!(%task, %stale, "dropping query result");
            return;
        }
        self.status = match outcome {
            Ok(result) => PaneStatus::Ready(result),
            Err(error) => {
                tracing::warn!(%error, "query failed");
                PaneStatus::Error(error.describe("running query"))
            }
        };
    }

    fn cancel(&self) -> bool {
        self.tasks.cancel()
    }

    fn abandon(&mut self) {
        self.tasks.abandon();
        if self.status == PaneStatus::Running {
            self.status = PaneStatus::Idle;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PaneTarget {
    pub(crate) slot: SlotId,
    pub(crate) database: String,
    pub(crate) key: PaneKey,
}

/// The tables and views of one database, reached through its own handle.
#[derive(Debug)]
pub struct ObjectSlot {
    connection: SlotId,
    config: Arc<ConnectionConfig>,
    database: String,
    handle: Option<SharedHandle>,
    tasks: TaskSlot,
    status: SlotStatus,
    entries: Vec<CatalogEntry>,
    selected_entry: Option<usize>,
    editor: ResultPane,
    relations: BTreeMap<String, ResultPane>,
}

impl ObjectSlot {
    pub(crate) fn new(connection: SlotId, config: Arc<ConnectionConfig>, database: &str) -> Self {
        Self {
            connection,
            config,
            database: database.to_string(),
            handle: None,
            tasks: TaskSlot::default(),
            status: SlotStatus::Disconnected,
            entries: Vec::new(),
            selected_entry: None,
            editor: ResultPane::new(String::new()),
            relations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn status(&self) -> &SlotStatus {
        &self.status
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn selected_entry(&self) -> Option<&CatalogEntry> {
        self.selected_entry.and_then(|index| self.entries.get(index))
    }

    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected_entry
    }

    #[must_use]
    pub fn has_live_handle(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn has_pending_task(&self) -> bool {
        self.tasks.is_pending()
    }

    #[must_use]
    pub fn editor(&self) -> &ResultPane {
        &self.editor
    }

    #[must_use]
    pub fn pane(&self, key: &PaneKey) -> Option<&ResultPane> {
        match key {
            PaneKey::Editor => Some(&self.editor),
            PaneKey::Relation(name) => self.relations.get(name),
        }
    }

    #[must_use]
    pub fn selected_pane(&self) -> Option<&ResultPane> {
        self.pane(&self.selected_key()?)
    }

    #[must_use]
    pub fn selected_key(&self) -> Option<PaneKey> {
        let entry = self.selected_entry()?;
        match entry.kind {
            EntryKind::SyntheticQueryEditor => Some(PaneKey::Editor),
            EntryKind::Table | EntryKind::View => Some(PaneKey::Relation(entry.name.clone())),
            EntryKind::Database => None,
        }
    }

    pub(crate) fn pane_mut(&mut self, key: &PaneKey) -> Option<&mut ResultPane> {
        match key {
            PaneKey::Editor => Some(&mut self.editor),
            PaneKey::Relation(name) => self.relations.get_mut(name),
        }
    }

    pub(crate) fn needs_init(&self) -> bool {
        self.handle.is_none() && !self.tasks.is_pending() && self.status.can_start()
    }

    pub(crate) fn init(
        &mut self,
        driver: &dyn DatabaseDriver,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<(), SlotError> {
        if !self.status.can_start() {
            return Err(SlotError::IllegalTransition {
                action: "open the database",
                status: self.status.clone(),
            });
        }
        if self.tasks.is_pending() {
            return Err(SlotError::Busy);
        }
        self.close_handle();

        let connection_string = self.config.connection_string(Some(&self.database));
        let handle = match driver.open(self.config.dialect, &connection_string) {
            Ok(handle) => handle,
            Err(error) => {
                let error = TaskError::from(error);
                tracing::warn!(
                    slot = %self.connection,
                    database = %self.database,
                    %error,
                    "failed to open database"
                );
                self.status = SlotStatus::Error(error.describe("opening connection"));
                return Ok(());
            }
        };

        let slot = self.connection;
        let catalog = self.config.dialect.catalog();
        let progress = spawner.updates().clone();
        let worker_handle = Arc::clone(&handle);
        let progress_database = self.database.clone();
        let database = self.database.clone();
        let token = spawner.spawn(
            "listing tables",
            move |ctx: TaskContext| async move {
                worker_handle.ping(&ctx).await?;
                let task = ctx.id();
                let _ = progress.enqueue(move |browser: &mut Browser| {
                    browser.apply_object_progress(slot, &progress_database, task);
                });
                let result = worker_handle.query(&ctx, catalog.list_objects).await?;
                Ok::<_, TaskError>(catalog.shape_objects(&result.rows))
            },
            move |browser: &mut Browser, task, outcome| {
                browser.apply_object_listing(slot, &database, task, outcome);
            },
        );

        tracing::info!(
            slot = %self.connection,
            database = %self.database,
            task = %token.id(),
            "opening database"
        );
        self.tasks.attach(token);
        self.handle = Some(handle);
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
            tracing::debug!(database = %self.database, %task, %stale, "dropping table listing");
            return false;
        }

        match outcome {
            Ok(entries) => {
                tracing::info!(database = %self.database, count = entries.len(), "tables listed");
                self.entries = entries;
                self.selected_entry = Some(0);
                self.status = SlotStatus::Ready;
                true
            }
            Err(error) => {
                tracing::warn!(database = %self.database, %error, "listing tables failed");
                self.close_handle();
                self.status = SlotStatus::Error(error.describe("listing tables"));
                false
            }
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.tasks.cancel()
    }

    pub(crate) fn select_entry(
        &mut self,
        index: usize,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<bool, SlotError> {
        if !self.status.is_ready() {
            return Err(SlotError::IllegalTransition {
                action: "select a table",
                status: self.status.clone(),
            });
        }
        let entry = self
            .entries
            .get(index)
            .cloned()
            .ok_or(SlotError::UnknownEntry(index))?;

        match entry.kind {
            EntryKind::SyntheticQueryEditor => {
                self.selected_entry = Some(index);
                Ok(false)
            }
            EntryKind::Table | EntryKind::View => {
                self.selected_entry = Some(index);
                let sql = self
                    .config
                    .dialect
                    .catalog()
                    .preview_sql(&entry.name, PREVIEW_ROW_LIMIT);
                let pane = self
                    .relations
                    .entry(entry.name.clone())
                    .or_insert_with(|| ResultPane::new(sql));
                if pane.status != PaneStatus::Idle || pane.tasks.is_pending() {
                    return Ok(false);
                }
                let Some(handle) = &self.handle else {
                    return Err(SlotError::IllegalTransition {
                        action: "preview a table",
                        status: SlotStatus::Disconnected,
                    });
                };
                let target = PaneTarget {
                    slot: self.connection,
                    database: self.database.clone(),
                    key: PaneKey::Relation(entry.name),
                };
                pane.run(handle, target, spawner)?;
                Ok(true)
            }
            EntryKind::Database => Err(SlotError::UnknownEntry(index)),
        }
    }

    pub(crate) fn run_query(
        &mut self,
        sql: &str,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<(), SlotError> {
        if !self.status.is_ready() {
            return Err(SlotError::IllegalTransition {
                action: "run a query",
                status: self.status.clone(),
            });
        }
        if self.editor.is_running() {
            return Err(SlotError::Busy);
        }
        self.editor.sql = sql.trim().to_string();
        self.selected_entry = Some(0);
        self.rerun(&PaneKey::Editor, spawner)
    }

    pub(crate) fn rerun(
        &mut self,
        key: &PaneKey,
        spawner: &TaskSpawner<Browser>,
    ) -> Result<(), SlotError> {
        if !self.status.is_ready() {
            return Err(SlotError::IllegalTransition {
                action: "run a query",
                status: self.status.clone(),
            });
        }
        let Some(handle) = &self.handle else {
            return Err(SlotError::IllegalTransition {
                action: "run a query",
                status: SlotStatus::Disconnected,
            });
        };
        let target = PaneTarget {
            slot: self.connection,
            database: self.database.clone(),
            key: key.clone(),
        };
        let pane = match key {
            PaneKey::Editor => &mut self.editor,
            PaneKey::Relation(name) => self
                .relations
                .get_mut(name)
                .ok_or_else(|| SlotError::UnknownPane(name.clone()))?,
        };
        pane.run(handle, target, spawner)
    }

    pub(crate) fn cancel_pane(&self, key: &PaneKey) -> bool {
        self.pane(key).is_some_and(ResultPane::cancel)
    }

    pub(crate) fn close(&mut self) {
        self.tasks.abandon();
        self.editor.abandon();
        for pane in self.relations.values_mut() {
            pane.abandon();
        }
        self.relations.clear();
        self.entries.clear();
        self.selected_entry = None;
        self.close_handle();
        self.status = SlotStatus::Disconnected;
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
            tracing::debug!(
                slot = %self.connection,
                database = %self.database,
                "database handle closed"
            );
        }
    }
}
