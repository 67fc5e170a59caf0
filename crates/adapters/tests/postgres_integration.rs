use std::sync::Arc;

use dbrowse_adapters::SqlDriver;
use dbrowse_core::browser::{Browser, SlotId};
use dbrowse_core::catalog::{Dialect, EntryKind};
use dbrowse_core::connection_slot::SlotStatus;
use dbrowse_core::dispatcher::{update_channel, UpdateQueue};
use dbrowse_core::object_slot::{PaneKey, PaneStatus};
use dbrowse_core::presentation::{FocusTarget, Presenter};
use dbrowse_core::profiles::{BrowserSettings, ConnectionConfig, TlsMode};
use dbrowse_core::task::TaskSpawner;
use tokio::runtime::Handle;

fn postgres_integration_enabled() -> bool {
    matches!(
        std::env::var("DBROWSE_RUN_POSTGRES_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_config() -> ConnectionConfig {
    let host = std::env::var("DBROWSE_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("DBROWSE_TEST_DB_USER").unwrap_or_else(|_| "postgres".to_string());
    let port = std::env::var("DBROWSE_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(5432);

    let mut config = ConnectionConfig::new("adapters-integration", Dialect::Postgres, host, user);
    config.port = Some(port);
    config.database = Some("postgres".to_string());
    config.tls_mode = TlsMode::Disabled;
    config.password_env = Some("DBROWSE_TEST_DB_PASSWORD".to_string());
    config
}

struct Headless;

impl Presenter for Headless {
    fn request_redraw(&mut self) {}

    fn focus(&mut self, _target: FocusTarget) {}
}

async fn drain_while(
    browser: &mut Browser,
    queue: &mut UpdateQueue<Browser>,
    busy: impl Fn(&Browser) -> bool,
) {
    while busy(browser) {
        assert!(queue.apply_next(browser).await, "update queue closed");
    }
}

fn object_busy(id: SlotId) -> impl Fn(&Browser) -> bool {
    move |browser| {
        browser
            .connection(id)
            .and_then(|slot| slot.object("postgres"))
            .is_some_and(|object| object.has_pending_task() || object.editor().is_running())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn browser_lists_databases_objects_and_runs_queries() {
    if !postgres_integration_enabled() {
        return;
    }

    let (updates, mut queue) = update_channel();
    let spawner = TaskSpawner::new(Handle::current(), updates);
    let mut browser = Browser::new(
        Arc::new(SqlDriver::new(Handle::current())),
        spawner,
        Box::new(Headless),
        BrowserSettings::default(),
    );
    let id = browser.add_connection(integration_config());

    browser.connect(id).expect("connect should start");
    drain_while(&mut browser, &mut queue, |browser| {
        browser
            .connection(id)
            .is_some_and(|slot| slot.has_pending_task())
    })
    .await;

    let slot = browser.connection(id).expect("slot");
    assert_eq!(slot.status(), &SlotStatus::Ready, "{:?}", slot.status());
    assert!(slot.databases().iter().any(|entry| entry.name == "postgres"));
    assert_eq!(slot.selected_database(), Some("postgres"));

    browser
        .select_database(id, "postgres")
        .expect("database should open");
    drain_while(&mut browser, &mut queue, object_busy(id)).await;
    let object = browser
        .connection(id)
        .and_then(|slot| slot.object("postgres"))
        .expect("object slot");
    assert_eq!(object.status(), &SlotStatus::Ready, "{:?}", object.status());
    assert_eq!(object.entries()[0].kind, EntryKind::SyntheticQueryEditor);

    browser
        .run_query(id, "postgres", "select 1 as one, 'x'::text as label")
        .expect("query should start");
    drain_while(&mut browser, &mut queue, object_busy(id)).await;
    let pane = browser
        .connection(id)
        .and_then(|slot| slot.object("postgres"))
        .and_then(|object| object.pane(&PaneKey::Editor))
        .expect("editor pane");
    match pane.status() {
        PaneStatus::Ready(result) => {
            assert_eq!(result.columns, vec!["one", "label"]);
            assert_eq!(result.rows[0].values, vec!["1", "x"]);
        }
        other => panic!("query did not succeed: {other:?}"),
    }

    browser.disconnect(id).expect("disconnect");
    assert_eq!(
        browser.connection(id).map(|slot| slot.status().clone()),
        Some(SlotStatus::Disconnected)
    );
}
