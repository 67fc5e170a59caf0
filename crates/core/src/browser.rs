//! Every configured connection, and the one place background outcomes are applied.
//!
//! User actions mutate slots directly and must run on the thread that owns the
//! [`Browser`]. Background work only reaches it through closures drained from the
//! [`UpdateQueue`](crate::dispatcher::UpdateQueue), which land on the `apply_*` methods.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{CatalogEntry, EntryKind};
use crate::connection_slot::ConnectionSlot;
use crate::dispatcher::Redraw;
use crate::driver::{DatabaseDriver, QueryResult};
use crate::error::{SlotError, TaskError};
use crate::layout::split_widths;
use crate::object_slot::{ObjectSlot, PaneKey, PaneTarget};
use crate::presentation::{FocusTarget, Presenter};
use crate::profiles::{BrowserSettings, ConnectionConfig};
use crate::task::{TaskId, TaskSpawner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct Browser {
    driver: Arc<dyn DatabaseDriver>,
    spawner: TaskSpawner<Browser>,
    presenter: Box<dyn Presenter>,
    settings: BrowserSettings,
    connections: Vec<ConnectionSlot>,
    active: Option<SlotId>,
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("spawner", &self.spawner)
            .field("settings", &self.settings)
            .field("connections", &self.connections)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Redraw for Browser {
    fn request_redraw(&mut self) {
        self.presenter.request_redraw();
    }
}

impl Browser {
    #[must_use]
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        spawner: TaskSpawner<Browser>,
        presenter: Box<dyn Presenter>,
        settings: BrowserSettings,
    ) -> Self {
        Self {
            driver,
            spawner,
            presenter,
            settings,
            connections: Vec::new(),
            active: None,
        }
    }

    pub fn add_connection(&mut self, config: ConnectionConfig) -> SlotId {
        let id = SlotId(self.connections.len());
        tracing::debug!(slot = %id, name = %config.name, "connection added");
        self.connections.push(ConnectionSlot::new(id, config));
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    #[must_use]
    pub fn connections(&self) -> &[ConnectionSlot] {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, id: SlotId) -> Option<&ConnectionSlot> {
        self.connections.get(id.0)
    }

    #[must_use]
    pub fn active(&self) -> Option<SlotId> {
        self.active
    }

    #[must_use]
    pub fn active_connection(&self) -> Option<&ConnectionSlot> {
        self.active.and_then(|id| self.connection(id))
    }

    #[must_use]
    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    #[must_use]
    pub fn spawner(&self) -> &TaskSpawner<Browser> {
        &self.spawner
    }

    pub fn activate(&mut self, id: SlotId) -> Result<(), SlotError> {
        let slot = slot(&self.connections, id)?;
        let target = if slot.status().is_ready() {
            FocusTarget::DatabaseList(id)
        } else {
            FocusTarget::ConnectControl(id)
        };
        self.active = Some(id);
        self.presenter.focus(target);
        Ok(())
    }

    pub fn connect(&mut self, id: SlotId) -> Result<(), SlotError> {
        let result =
            slot_mut(&mut self.connections, id)?.connect(self.driver.as_ref(), &self.spawner);
        self.after("connect", result)
    }

    pub fn cancel(&mut self, id: SlotId) -> Result<bool, SlotError> {
        Ok(slot(&self.connections, id)?.cancel())
    }

    pub fn disconnect(&mut self, id: SlotId) -> Result<(), SlotError> {
        let result = slot_mut(&mut self.connections, id)?.disconnect();
        self.after("disconnect", result)?;
        self.presenter.focus(FocusTarget::ConnectControl(id));
        Ok(())
    }

    pub fn edit_settings(&mut self, id: SlotId) -> Result<(), SlotError> {
        let slot = slot(&self.connections, id)?;
        if !slot.status().can_start() || slot.has_pending_task() {
            let error = SlotError::IllegalTransition {
                action: "edit settings",
                status: slot.status().clone(),
            };
            tracing::warn!(slot = %id, %error, "ignored action");
            return Err(error);
        }
        self.presenter.focus(FocusTarget::SettingsEditor(id));
        Ok(())
    }

    pub fn cancel_settings(&mut self, id: SlotId) -> Result<(), SlotError> {
        slot(&self.connections, id)?;
        self.presenter.focus(FocusTarget::ConnectControl(id));
        Ok(())
    }

    pub fn apply_settings(
        &mut self,
        id: SlotId,
        config: ConnectionConfig,
    ) -> Result<(), SlotError> {
        let slot = slot_mut(&mut self.connections, id)?;
        if !slot.status().can_start() || slot.has_pending_task() {
            let error = SlotError::IllegalTransition {
                action: "apply settings",
                status: slot.status().clone(),
            };
            tracing::warn!(slot = %id, %error, "ignored action");
            return Err(error);
        }
        slot.shutdown();
        tracing::info!(slot = %id, name = %config.name, "connection settings replaced");
        *slot = ConnectionSlot::new(id, config);
        self.presenter.focus(FocusTarget::ConnectControl(id));
        self.connect(id)
    }

    pub fn select_database(&mut self, id: SlotId, database: &str) -> Result<(), SlotError> {
        let result = slot_mut(&mut self.connections, id)?.select_database(
            database,
            self.driver.as_ref(),
            &self.spawner,
        );
        let started = self.after("select a database", result)?;
        let ready = slot(&self.connections, id)?
            .object(database)
            .is_some_and(|object| object.status().is_ready());
        if !started && ready {
            self.presenter.focus(FocusTarget::ObjectList {
                slot: id,
                database: database.to_string(),
            });
        }
        Ok(())
    }

    pub fn cancel_database(&mut self, id: SlotId, database: &str) -> Result<bool, SlotError> {
        Ok(object_mut(&mut self.connections, id, database)?.cancel())
    }

    pub fn select_entry(
        &mut self,
        id: SlotId,
        database: &str,
        index: usize,
    ) -> Result<(), SlotError> {
        let object = object_mut(&mut self.connections, id, database)?;
        let result = object.select_entry(index, &self.spawner);
        let editor = object
            .selected_entry()
            .is_some_and(|entry| entry.kind == EntryKind::SyntheticQueryEditor);
        self.after("select a table", result)?;
        if editor {
            self.presenter.focus(FocusTarget::QueryEditor {
                slot: id,
                database: database.to_string(),
            });
        }
        Ok(())
    }

    pub fn run_query(&mut self, id: SlotId, database: &str, sql: &str) -> Result<(), SlotError> {
        let result = object_mut(&mut self.connections, id, database)?.run_query(sql, &self.spawner);
        self.after("run a query", result)
    }

    pub fn rerun(&mut self, id: SlotId, database: &str, key: &PaneKey) -> Result<(), SlotError> {
        let result = object_mut(&mut self.connections, id, database)?.rerun(key, &self.spawner);
        self.after("run a query", result)
    }

    pub fn cancel_query(
        &mut self,
        id: SlotId,
        database: &str,
        key: &PaneKey,
    ) -> Result<bool, SlotError> {
        Ok(object_mut(&mut self.connections, id, database)?.cancel_pane(key))
    }

    pub fn toggle_side_bars(&mut self) -> bool {
        self.settings.hide_side_bars = !self.settings.hide_side_bars;
        self.presenter.request_redraw();
        self.settings.hide_side_bars
    }

    #[must_use]
    pub fn split(&self, total: u16) -> [u16; 2] {
        split_widths(
            total,
            self.settings.sidebar_width,
            self.settings.hide_side_bars,
        )
    }

    pub fn close_all(&mut self) {
        for slot in &mut self.connections {
            slot.shutdown();
        }
    }

    pub(crate) fn apply_connection_progress(&mut self, id: SlotId, task: TaskId) {
        if let Some(slot) = self.connections.get_mut(id.0) {
            slot.mark_listing(task);
        }
    }

    pub(crate) fn apply_database_listing(
        &mut self,
        id: SlotId,
        task: TaskId,
        outcome: Result<Vec<CatalogEntry>, TaskError>,
    ) {
        let Some(slot) = self.connections.get_mut(id.0) else {
            tracing::debug!(slot = %id, %task, "connection gone, dropping database listing");
            return;
        };
        if slot.finish_listing(task, outcome) && self.active == Some(id) {
            self.presenter.focus(FocusTarget::DatabaseList(id));
        }
    }

    pub(crate) fn apply_object_progress(&mut self, id: SlotId, database: &str, task: TaskId) {
        if let Some(object) = self.object_slot_mut(id, database) {
            object.mark_listing(task);
        }
    }

    pub(crate) fn apply_object_listing(
        &mut self,
        id: SlotId,
        database: &str,
        task: TaskId,
        outcome: Result<Vec<CatalogEntry>, TaskError>,
    ) {
        let Some(object) = self.object_slot_mut(id, database) else {
            tracing::debug!(slot = %id, database, %task, "database closed, dropping table listing");
            return;
        };
        if object.finish_listing(task, outcome) && self.active == Some(id) {
            self.presenter.focus(FocusTarget::ObjectList {
                slot: id,
                database: database.to_string(),
            });
        }
    }

    pub(crate) fn apply_pane_result(
        &mut self,
        target: &PaneTarget,
        task: TaskId,
        outcome: Result<QueryResult, TaskError>,
    ) {
        let pane = self
            .object_slot_mut(target.slot, &target.database)
            .and_then(|object| object.pane_mut(&target.key));
        match pane {
            Some(pane) => pane.finish(task, outcome),
            None => {
                tracing::debug!(
                    slot = %target.slot,
                    database = %target.database,
                    %task,
                    "pane gone, dropping query result"
                );
            }
        }
    }

    fn object_slot_mut(&mut self, id: SlotId, database: &str) -> Option<&mut ObjectSlot> {
        self.connections.get_mut(id.0)?.object_mut(database)
    }

    fn after<T>(&mut self, action: &str, result: Result<T, SlotError>) -> Result<T, SlotError> {
        match &result {
            Ok(_) => self.presenter.request_redraw(),
            Err(error) => tracing::warn!(action, %error, "ignored action"),
        }
        result
    }
}

fn slot(connections: &[ConnectionSlot], id: SlotId) -> Result<&ConnectionSlot, SlotError> {
    connections
        .get(id.0)
        .ok_or(SlotError::UnknownConnection(id.0))
}

fn slot_mut(
    connections: &mut [ConnectionSlot],
    id: SlotId,
) -> Result<&mut ConnectionSlot, SlotError> {
    connections
        .get_mut(id.0)
        .ok_or(SlotError::UnknownConnection(id.0))
}

fn object_mut<'a>(
    connections: &'a mut [ConnectionSlot],
    id: SlotId,
    database: &str,
) -> Result<&'a mut ObjectSlot, SlotError> {
    slot_mut(connections, id)?
        .object_mut(database)
        .ok_or_else(|| SlotError::UnknownDatabase(database.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Browser, SlotId};
    use crate::catalog::{Dialect, EntryKind, QUERY_EDITOR_ENTRY};
    use crate::connection_slot::SlotStatus;
    use crate::dispatcher::{update_channel, UpdateQueue};
    use crate::driver::DatabaseDriver;
    use crate::error::{DriverError, SlotError};
    use crate::object_slot::{PaneKey, PaneStatus, MAX_RESULT_ROWS};
    use crate::presentation::{FocusTarget, Presenter};
    use crate::profiles::{BrowserSettings, ConnectionConfig};
    use crate::task::TaskSpawner;
    use crate::testing::FakeDriver;

    #[derive(Debug, Default)]
    struct Recorded {
        redraws: usize,
        focus: Vec<FocusTarget>,
    }

    struct RecordingPresenter(Arc<Mutex<Recorded>>);

    impl Presenter for RecordingPresenter {
        fn request_redraw(&mut self) {
            if let Ok(mut recorded) = self.0.lock() {
                recorded.redraws += 1;
            }
        }

        fn focus(&mut self, target: FocusTarget) {
            if let Ok(mut recorded) = self.0.lock() {
                recorded.focus.push(target);
            }
        }
    }

    struct Harness {
        browser: Browser,
        queue: UpdateQueue<Browser>,
        driver: Arc<FakeDriver>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl Harness {
        fn new(deadline: Duration) -> Self {
            let driver = FakeDriver::new();
            let (updates, queue) = update_channel();
            let spawner = TaskSpawner::new(tokio::runtime::Handle::current(), updates)
                .with_deadline(deadline);
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            let boxed: Arc<dyn DatabaseDriver> = Arc::new(Arc::clone(&driver));
            let browser = Browser::new(
                boxed,
                spawner,
                Box::new(RecordingPresenter(Arc::clone(&recorded))),
                BrowserSettings::default(),
            );
            Self {
                browser,
                queue,
                driver,
                recorded,
            }
        }

        fn with_postgres() -> (Self, SlotId) {
            let mut harness = Self::new(Duration::from_secs(5));
            let id = harness.browser.add_connection(config());
            (harness, id)
        }

        async fn next(&mut self) {
            let applied = tokio::time::timeout(
                Duration::from_secs(5),
                self.queue.apply_next(&mut self.browser),
            )
            .await;
            assert!(matches!(applied, Ok(true)), "no update arrived");
        }

        async fn until(&mut self, done: impl Fn(&Browser) -> bool) {
            while !done(&self.browser) {
                self.next().await;
            }
        }

        async fn connected(&mut self, id: SlotId) {
            self.until(|browser| {
                browser
                    .connection(id)
                    .is_some_and(|slot| !slot.has_pending_task())
            })
            .await;
        }

        async fn opened(&mut self, id: SlotId, database: &str) {
            self.until(|browser| {
                browser
                    .connection(id)
                    .and_then(|slot| slot.object(database))
                    .is_some_and(|object| !object.has_pending_task())
            })
            .await;
        }

        async fn pane_settled(&mut self, id: SlotId, database: &str, key: &PaneKey) {
            self.until(|browser| {
                browser
                    .connection(id)
                    .and_then(|slot| slot.object(database))
                    .and_then(|object| object.pane(key))
                    .is_some_and(|pane| !pane.is_running())
            })
            .await;
        }

        fn status(&self, id: SlotId) -> SlotStatus {
            self.browser
                .connection(id)
                .map(|slot| slot.status().clone())
                .unwrap_or(SlotStatus::Disconnected)
        }

        fn object_status(&self, id: SlotId, database: &str) -> Option<SlotStatus> {
            self.browser
                .connection(id)
                .and_then(|slot| slot.object(database))
                .map(|object| object.status().clone())
        }

        fn pane_status(&self, id: SlotId, database: &str, key: &PaneKey) -> Option<PaneStatus> {
            self.browser
                .connection(id)
                .and_then(|slot| slot.object(database))
                .and_then(|object| object.pane(key))
                .map(|pane| pane.status().clone())
        }

        fn focused(&self) -> Vec<FocusTarget> {
            self.recorded
                .lock()
                .map(|recorded| recorded.focus.clone())
                .unwrap_or_default()
        }

        fn database_names(&self, id: SlotId) -> Vec<String> {
            self.browser
                .connection(id)
                .map(|slot| slot.databases().iter().map(|entry| entry.name.clone()).collect())
                .unwrap_or_default()
        }

        async fn open_app(&mut self, id: SlotId) {
            self.driver.reply("pg_database", &[&["app", "false"]]);
            self.driver.reply(
                "information_schema.tables",
                &[
                    &["public", "users", "BASE TABLE"],
                    &["public", "recent", "VIEW"],
                ],
            );
            self.browser.connect(id).expect("connect");
            self.connected(id).await;
            self.browser.select_database(id, "app").expect("select app");
            self.opened(id, "app").await;
            assert_eq!(self.object_status(id, "app"), Some(SlotStatus::Ready));
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("local", Dialect::Postgres, "localhost", "postgres")
    }

    fn users() -> PaneKey {
        PaneKey::Relation("public.users".to_string())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_lists_databases_and_focuses_the_list() {
        let (mut harness, id) = Harness::with_postgres();
        harness.driver.reply(
            "pg_database",
            &[&["zz", "false"], &["aa", "false"], &["template0", "true"]],
        );

        harness.browser.connect(id).expect("connect");
        assert_eq!(harness.status(id), SlotStatus::Connecting);
        harness.connected(id).await;

        assert_eq!(harness.status(id), SlotStatus::Ready);
        assert_eq!(harness.database_names(id), vec!["aa", "zz"]);
        assert_eq!(harness.browser.spawner().spawned(), 1);
        assert!(harness.focused().contains(&FocusTarget::DatabaseList(id)));
        assert!(harness.recorded.lock().map(|r| r.redraws > 0).unwrap_or(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_connect_while_in_flight_is_rejected() {
        let (mut harness, id) = Harness::with_postgres();
        let gate = harness.driver.gate("pg_database");

        harness.browser.connect(id).expect("connect");
        let second = harness.browser.connect(id);
        assert_eq!(
            second,
            Err(SlotError::IllegalTransition {
                action: "connect",
                status: SlotStatus::Connecting,
            })
        );
        assert_eq!(harness.browser.spawner().spawned(), 1);

        gate.add_permits(1);
        harness.connected(id).await;
        assert_eq!(harness.status(id), SlotStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_a_stuck_listing_ends_in_an_error_state() {
        let (mut harness, id) = Harness::with_postgres();
        let gate = harness.driver.gate("pg_database");

        harness.browser.connect(id).expect("connect");
        assert_eq!(harness.browser.cancel(id), Ok(true));
        harness.connected(id).await;

        assert_eq!(
            harness.status(id),
            SlotStatus::Error("listing databases: cancelled".to_string())
        );
        assert_eq!(harness.driver.opened(), 1);
        assert_eq!(harness.driver.closed(), 1);
        assert_eq!(harness.browser.cancel(id), Ok(false));

        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.queue.apply_pending(&mut harness.browser), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listing_failure_closes_the_handle_and_connect_retries() {
        let (mut harness, id) = Harness::with_postgres();
        harness
            .driver
            .fail("pg_database", DriverError::query("permission denied"));

        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        assert_eq!(
            harness.status(id),
            SlotStatus::Error("listing databases: permission denied".to_string())
        );
        assert!(!harness.browser.connection(id).is_some_and(|slot| slot.has_live_handle()));
        assert_eq!(harness.driver.closed(), 1);

        harness.driver.reply("pg_database", &[&["app", "false"]]);
        harness.browser.connect(id).expect("retry");
        harness.connected(id).await;
        assert_eq!(harness.status(id), SlotStatus::Ready);
        assert_eq!(harness.driver.opened(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_ping_is_reported_as_a_connect_error() {
        let (mut harness, id) = Harness::with_postgres();
        harness
            .driver
            .fail_ping(DriverError::connect("connection refused"));

        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        assert_eq!(
            harness.status(id),
            SlotStatus::Error("listing databases: cannot connect: connection refused".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_failure_is_reported_without_spawning() {
        let (mut harness, id) = Harness::with_postgres();
        harness
            .driver
            .fail_open(DriverError::connect("invalid connection string"));

        harness.browser.connect(id).expect("connect");
        assert_eq!(
            harness.status(id),
            SlotStatus::Error(
                "opening connection: cannot connect: invalid connection string".to_string()
            )
        );
        assert_eq!(harness.browser.spawner().spawned(), 0);

        harness.driver.clear_failures();
        harness.browser.connect(id).expect("retry");
        harness.connected(id).await;
        assert_eq!(harness.status(id), SlotStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_expiry_is_reported_as_a_timeout() {
        let mut harness = Harness::new(Duration::from_millis(50));
        let id = harness.browser.add_connection(config());
        let _gate = harness.driver.gate("pg_database");

        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        match harness.status(id) {
            SlotStatus::Error(message) => {
                assert!(message.starts_with("listing databases: timed out"), "{message}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(harness.driver.closed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fixed_database_is_selected_but_not_opened() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let mut fixed = config();
        fixed.database = Some("app".to_string());
        let id = harness.browser.add_connection(fixed);
        harness
            .driver
            .reply("pg_database", &[&["app", "false"], &["other", "false"]]);

        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;

        let slot = harness.browser.connection(id).expect("slot");
        assert_eq!(slot.selected_database(), Some("app"));
        assert_eq!(
            slot.object("app").map(|object| object.status().clone()),
            Some(SlotStatus::Disconnected)
        );
        assert_eq!(harness.browser.spawner().spawned(), 1);

        harness.browser.select_database(id, "app").expect("open");
        assert_eq!(harness.browser.spawner().spawned(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn opening_a_database_lists_objects_behind_the_query_editor() {
        let (mut harness, id) = Harness::with_postgres();
        harness.open_app(id).await;

        let object = harness
            .browser
            .connection(id)
            .and_then(|slot| slot.object("app"))
            .expect("object slot");
        let names: Vec<_> = object.entries().iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec![QUERY_EDITOR_ENTRY, "public.recent", "public.users"]);
        assert_eq!(object.entries()[1].kind, EntryKind::View);
        assert_eq!(object.selected_index(), Some(0));
        assert!(harness.focused().contains(&FocusTarget::ObjectList {
            slot: id,
            database: "app".to_string(),
        }));

        let handles = harness.driver.handles();
        assert_eq!(handles.len(), 2);
        assert!(handles[1].connection_string().contains("/app"));
        assert_eq!(handles[1].dialect(), Dialect::Postgres);

        harness.browser.select_database(id, "app").expect("reselect");
        assert_eq!(harness.browser.spawner().spawned(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preview_runs_once_per_table() {
        let (mut harness, id) = Harness::with_postgres();
        harness.open_app(id).await;

        harness.browser.select_entry(id, "app", 2).expect("select users");
        harness.browser.select_entry(id, "app", 2).expect("reselect while running");
        harness.pane_settled(id, "app", &users()).await;
        harness.browser.select_entry(id, "app", 0).expect("editor");
        harness.browser.select_entry(id, "app", 2).expect("reselect when ready");

        assert_eq!(harness.browser.spawner().spawned(), 3);
        assert!(matches!(
            harness.pane_status(id, "app", &users()),
            Some(PaneStatus::Ready(_))
        ));
        let previews: Vec<_> = harness.driver.handles()[1]
            .queries()
            .into_iter()
            .filter(|sql| sql.contains("limit 200"))
            .collect();
        assert_eq!(previews, vec![r#"select * from "public"."users" limit 200"#]);
        assert!(harness.focused().contains(&FocusTarget::QueryEditor {
            slot: id,
            database: "app".to_string(),
        }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_editor_runs_statements_and_caps_rows() {
        let (mut harness, id) = Harness::with_postgres();
        harness.open_app(id).await;
        let many = vec![&["x"][..]; MAX_RESULT_ROWS + 500];
        harness.driver.reply("generate_series", &many);
        harness
            .driver
            .fail("select broken", DriverError::query("syntax error at or near \"broken\""));

        harness
            .browser
            .run_query(id, "app", "select * from generate_series(1, 1500)")
            .expect("run");
        harness.pane_settled(id, "app", &PaneKey::Editor).await;
        match harness.pane_status(id, "app", &PaneKey::Editor) {
            Some(PaneStatus::Ready(result)) => assert_eq!(result.rows.len(), MAX_RESULT_ROWS),
            other => panic!("expected rows, got {other:?}"),
        }

        harness.browser.run_query(id, "app", "select broken").expect("run");
        harness.pane_settled(id, "app", &PaneKey::Editor).await;
        assert_eq!(
            harness.pane_status(id, "app", &PaneKey::Editor),
            Some(PaneStatus::Error(
                "running query: syntax error at or near \"broken\"".to_string()
            ))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_query_can_be_run_again() {
        let (mut harness, id) = Harness::with_postgres();
        harness.open_app(id).await;
        let gate = harness.driver.gate("pg_sleep");

        harness.browser.run_query(id, "app", "select pg_sleep(60)").expect("run");
        assert_eq!(
            harness.browser.run_query(id, "app", "select 1"),
            Err(SlotError::Busy)
        );
        assert_eq!(harness.browser.cancel_query(id, "app", &PaneKey::Editor), Ok(true));
        harness.pane_settled(id, "app", &PaneKey::Editor).await;
        assert_eq!(
            harness.pane_status(id, "app", &PaneKey::Editor),
            Some(PaneStatus::Error("running query: cancelled".to_string()))
        );

        gate.add_permits(1);
        harness.browser.rerun(id, "app", &PaneKey::Editor).expect("rerun");
        harness.pane_settled(id, "app", &PaneKey::Editor).await;
        assert!(matches!(
            harness.pane_status(id, "app", &PaneKey::Editor),
            Some(PaneStatus::Ready(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_closes_every_handle_exactly_once() {
        let (mut harness, id) = Harness::with_postgres();
        harness.open_app(id).await;
        harness.browser.select_entry(id, "app", 2).expect("preview");
        harness.pane_settled(id, "app", &users()).await;

        harness.browser.disconnect(id).expect("disconnect");

        let slot = harness.browser.connection(id).expect("slot");
        assert_eq!(slot.status(), &SlotStatus::Disconnected);
        assert!(slot.databases().is_empty());
        assert!(slot.object("app").is_none());
        assert!(!slot.has_live_handle());
        let handles = harness.driver.handles();
        assert_eq!(handles.len(), 2);
        assert!(handles.iter().all(|handle| handle.closes() == 1));
        assert_eq!(harness.focused().last(), Some(&FocusTarget::ConnectControl(id)));

        assert!(matches!(
            harness.browser.disconnect(id),
            Err(SlotError::IllegalTransition { .. })
        ));
        assert_eq!(harness.driver.closed(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_drops_the_outcome_of_an_abandoned_table_listing() {
        let (mut harness, id) = Harness::with_postgres();
        harness.driver.reply("pg_database", &[&["app", "false"]]);
        let gate = harness.driver.gate("information_schema.tables");
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        harness.browser.select_database(id, "app").expect("open");

        harness.browser.disconnect(id).expect("disconnect");
        gate.add_permits(1);
        harness.next().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        harness.queue.apply_pending(&mut harness.browser);

        let slot = harness.browser.connection(id).expect("slot");
        assert_eq!(slot.status(), &SlotStatus::Disconnected);
        assert!(slot.object("app").is_none());
        assert_eq!(harness.driver.closed(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_a_table_listing_discards_its_late_result() {
        let (mut harness, id) = Harness::with_postgres();
        harness.driver.reply("pg_database", &[&["app", "false"]]);
        let gate = harness.driver.gate("information_schema.tables");
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;

        harness.browser.select_database(id, "app").expect("open");
        assert_eq!(harness.browser.cancel_database(id, "app"), Ok(true));
        harness.opened(id, "app").await;

        assert_eq!(
            harness.object_status(id, "app"),
            Some(SlotStatus::Error("listing tables: cancelled".to_string()))
        );
        let handles = harness.driver.handles();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[1].closes(), 1);
        assert_eq!(harness.browser.cancel_database(id, "app"), Ok(false));

        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        harness.queue.apply_pending(&mut harness.browser);
        assert_eq!(
            harness.object_status(id, "app"),
            Some(SlotStatus::Error("listing tables: cancelled".to_string()))
        );
        assert_eq!(handles[1].closes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_table_listing_is_retried_by_reselecting_the_database() {
        let (mut harness, id) = Harness::with_postgres();
        harness.driver.reply("pg_database", &[&["app", "false"]]);
        harness.driver.fail(
            "information_schema.tables",
            DriverError::query("permission denied for schema public"),
        );
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;

        harness.browser.select_database(id, "app").expect("open");
        harness.opened(id, "app").await;
        assert_eq!(
            harness.object_status(id, "app"),
            Some(SlotStatus::Error(
                "listing tables: permission denied for schema public".to_string()
            ))
        );
        assert_eq!(harness.driver.handles()[1].closes(), 1);

        harness
            .driver
            .reply("information_schema.tables", &[&["public", "users", "BASE TABLE"]]);
        harness.browser.select_database(id, "app").expect("retry");
        harness.opened(id, "app").await;

        assert_eq!(harness.object_status(id, "app"), Some(SlotStatus::Ready));
        assert_eq!(harness.driver.opened(), 3);
        assert_eq!(harness.browser.spawner().spawned(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_table_listing_times_out() {
        let mut harness = Harness::new(Duration::from_millis(50));
        let id = harness.browser.add_connection(config());
        harness.driver.reply("pg_database", &[&["app", "false"]]);
        let _gate = harness.driver.gate("information_schema.tables");
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        assert_eq!(harness.status(id), SlotStatus::Ready);

        harness.browser.select_database(id, "app").expect("open");
        harness.opened(id, "app").await;
        match harness.object_status(id, "app") {
            Some(SlotStatus::Error(message)) => {
                assert!(message.starts_with("listing tables: timed out"), "{message}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(harness.status(id), SlotStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_listing_does_not_steal_focus_from_the_active_connection() {
        let (mut harness, first) = Harness::with_postgres();
        let mut other = config();
        other.name = "reporting".to_string();
        let second = harness.browser.add_connection(other);
        assert_eq!(harness.browser.active(), Some(first));
        harness.driver.reply("pg_database", &[&["app", "false"]]);

        harness.browser.connect(second).expect("connect");
        harness.connected(second).await;

        assert_eq!(harness.status(second), SlotStatus::Ready);
        assert!(!harness.focused().contains(&FocusTarget::DatabaseList(second)));

        harness.browser.activate(second).expect("activate");
        assert_eq!(harness.focused().last(), Some(&FocusTarget::DatabaseList(second)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn applying_settings_replaces_the_slot_and_reconnects() {
        let (mut harness, id) = Harness::with_postgres();
        harness.driver.fail_ping(DriverError::connect("no route to host"));
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        assert!(matches!(harness.status(id), SlotStatus::Error(_)));

        harness.browser.edit_settings(id).expect("edit");
        assert_eq!(harness.focused().last(), Some(&FocusTarget::SettingsEditor(id)));

        harness.driver.clear_failures();
        harness.driver.reply("pg_database", &[&["app", "false"]]);
        let mut updated = config();
        updated.host = "db2.internal".to_string();
        harness.browser.apply_settings(id, updated).expect("apply");
        harness.connected(id).await;

        assert_eq!(harness.status(id), SlotStatus::Ready);
        let slot = harness.browser.connection(id).expect("slot");
        assert_eq!(slot.config().host, "db2.internal");
        assert!(harness.driver.handles()[1].connection_string().contains("db2.internal"));
        assert_eq!(harness.browser.spawner().spawned(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn settings_cannot_be_edited_while_connecting() {
        let (mut harness, id) = Harness::with_postgres();
        let gate = harness.driver.gate("pg_database");
        harness.browser.connect(id).expect("connect");

        assert!(matches!(
            harness.browser.edit_settings(id),
            Err(SlotError::IllegalTransition { action: "edit settings", .. })
        ));
        assert!(matches!(
            harness.browser.apply_settings(id, config()),
            Err(SlotError::IllegalTransition { action: "apply settings", .. })
        ));
        harness.browser.cancel_settings(id).expect("cancel settings");
        assert_eq!(harness.focused().last(), Some(&FocusTarget::ConnectControl(id)));

        gate.add_permits(1);
        harness.connected(id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn database_selection_requires_a_listed_database() {
        let (mut harness, id) = Harness::with_postgres();
        assert!(matches!(
            harness.browser.select_database(id, "app"),
            Err(SlotError::IllegalTransition { .. })
        ));

        harness.driver.reply("pg_database", &[&["app", "false"]]);
        harness.browser.connect(id).expect("connect");
        harness.connected(id).await;
        assert_eq!(
            harness.browser.select_database(id, "missing"),
            Err(SlotError::UnknownDatabase("missing".to_string()))
        );
        assert_eq!(
            harness.browser.connect(SlotId(7)),
            Err(SlotError::UnknownConnection(7))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn side_bars_toggle_collapses_the_left_pane() {
        let (mut harness, _id) = Harness::with_postgres();
        assert_eq!(harness.browser.split(100), [30, 70]);
        assert!(harness.browser.toggle_side_bars());
        assert_eq!(harness.browser.split(100), [0, 100]);
        assert!(!harness.browser.toggle_side_bars());
    }
}
