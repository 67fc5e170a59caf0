use std::cell::RefCell;
use std::io::{self, Stdout};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use dbrowse_adapters::SqlDriver;
use dbrowse_core::browser::{Browser, SlotId};
use dbrowse_core::catalog::{CatalogEntry, Dialect};
use dbrowse_core::connection_slot::{ConnectionSlot, SlotStatus};
use dbrowse_core::dispatcher::{update_channel, UpdateQueue};
use dbrowse_core::driver::{DatabaseDriver, QueryResult};
use dbrowse_core::error::SlotError;
use dbrowse_core::object_slot::{ObjectSlot, PaneKey, PaneStatus};
use dbrowse_core::presentation::{FocusTarget, Presenter};
use dbrowse_core::profiles::{BrowserSettings, ConnectionConfig, FileProfilesStore};
use dbrowse_core::task::TaskSpawner;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::{Builder, Handle};

const TICK_RATE: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default)]
struct ViewState {
    needs_redraw: bool,
    focus: Option<FocusTarget>,
}

#[derive(Debug, Clone, Default)]
struct TerminalPresenter {
    state: Rc<RefCell<ViewState>>,
}

impl Presenter for TerminalPresenter {
    fn request_redraw(&mut self) {
        self.state.borrow_mut().needs_redraw = true;
    }

    fn focus(&mut self, target: FocusTarget) {
        let mut state = self.state.borrow_mut();
        state.focus = Some(target);
        state.needs_redraw = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Connections,
    Databases,
    Objects,
    Content,
}

impl Pane {
    fn next(self, side_bars_hidden: bool) -> Self {
        if side_bars_hidden {
            return Self::Content;
        }
        match self {
            Self::Connections => Self::Databases,
            Self::Databases => Self::Objects,
            Self::Objects => Self::Content,
            Self::Content => Self::Connections,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Connections => "Connections",
            Self::Databases => "Databases",
            Self::Objects => "Tables",
            Self::Content => "Content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Editor,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsField {
    Name,
    Dialect,
    Host,
    Port,
    User,
    Database,
}

impl SettingsField {
    const ALL: [SettingsField; 6] = [
        Self::Name,
        Self::Dialect,
        Self::Host,
        Self::Port,
        Self::User,
        Self::Database,
    ];

    fn next(self) -> Self {
        match self {
            Self::Name => Self::Dialect,
            Self::Dialect => Self::Host,
            Self::Host => Self::Port,
            Self::Port => Self::User,
            Self::User => Self::Database,
            Self::Database => Self::Name,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Name => Self::Database,
            Self::Dialect => Self::Name,
            Self::Host => Self::Dialect,
            Self::Port => Self::Host,
            Self::User => Self::Port,
            Self::Database => Self::User,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Dialect => "Type",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::User => "User",
            Self::Database => "Database",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SettingsForm {
    slot: SlotId,
    base: ConnectionConfig,
    name: String,
    dialect: String,
    host: String,
    port: String,
    user: String,
    database: String,
    active_field: SettingsField,
}

impl SettingsForm {
    fn from_config(slot: SlotId, config: &ConnectionConfig) -> Self {
        Self {
            slot,
            base: config.clone(),
            name: config.name.clone(),
            dialect: config.dialect.to_string(),
            host: config.host.clone(),
            port: config.port().to_string(),
            user: config.user.clone(),
            database: config.database.clone().unwrap_or_default(),
            active_field: SettingsField::Name,
        }
    }

    fn value(&self, field: SettingsField) -> &str {
        match field {
            SettingsField::Name => &self.name,
            SettingsField::Dialect => &self.dialect,
            SettingsField::Host => &self.host,
            SettingsField::Port => &self.port,
            SettingsField::User => &self.user,
            SettingsField::Database => &self.database,
        }
    }

    fn active_value_mut(&mut self) -> &mut String {
        match self.active_field {
            SettingsField::Name => &mut self.name,
            SettingsField::Dialect => &mut self.dialect,
            SettingsField::Host => &mut self.host,
            SettingsField::Port => &mut self.port,
            SettingsField::User => &mut self.user,
            SettingsField::Database => &mut self.database,
        }
    }

    fn to_config(&self) -> Result<ConnectionConfig, String> {
        let dialect = parse_dialect(&self.dialect)
            .ok_or_else(|| format!("unknown database type `{}`", self.dialect.trim()))?;
        let port = match self.port.trim() {
            "" => None,
            raw => Some(
                raw.parse::<u16>()
                    .map_err(|_| format!("invalid port `{raw}`"))?,
            ),
        };
        let name = self.name.trim();
        if name.is_empty() {
            return Err("connection name is required".to_string());
        }

        let mut config = self.base.clone();
        config.name = name.to_string();
        config.dialect = dialect;
        config.host = self.host.trim().to_string();
        config.port = port;
        config.user = self.user.trim().to_string();
        config.database = Some(self.database.trim())
            .filter(|database| !database.is_empty())
            .map(str::to_string);
        Ok(config)
    }
}

fn parse_dialect(raw: &str) -> Option<Dialect> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw == "mssql" || raw == "sql_server" {
        return Some(Dialect::SqlServer);
    }
    Dialect::ALL
        .into_iter()
        .find(|dialect| dialect.catalog().label == raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    Submit,
    Cancel,
    Leave,
    Navigate(DirectionKey),
    Disconnect,
    EditSettings,
    ToggleSideBars,
    Retry,
    Input(char),
    Backspace,
}

struct TuiApp {
    browser: Browser,
    queue: UpdateQueue<Browser>,
    view: Rc<RefCell<ViewState>>,
    store: Option<FileProfilesStore>,
    pane: Pane,
    mode: InputMode,
    connection_cursor: usize,
    database_cursor: usize,
    object_cursor: usize,
    editor_text: String,
    settings_form: Option<SettingsForm>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl TuiApp {
    fn new(
        driver: Arc<dyn DatabaseDriver>,
        runtime: Handle,
        connections: Vec<ConnectionConfig>,
        settings: BrowserSettings,
        store: Option<FileProfilesStore>,
    ) -> Self {
        let (updates, queue) = update_channel();
        let spawner = TaskSpawner::new(runtime, updates).with_deadline(settings.task_deadline());
        let presenter = TerminalPresenter::default();
        let view = Rc::clone(&presenter.state);
        let mut browser = Browser::new(driver, spawner, Box::new(presenter), settings);

        let connections = if connections.is_empty() {
            vec![placeholder_connection()]
        } else {
            connections
        };
        for config in connections {
            browser.add_connection(config);
        }
        view.borrow_mut().needs_redraw = true;

        Self {
            browser,
            queue,
            view,
            store,
            pane: Pane::Connections,
            mode: InputMode::Normal,
            connection_cursor: 0,
            database_cursor: 0,
            object_cursor: 0,
            editor_text: String::new(),
            settings_form: None,
            show_help: false,
            should_quit: false,
            status_line: "Enter: connect | e: edit settings | ?: help".to_string(),
        }
    }

    fn apply_updates(&mut self) -> usize {
        let applied = self.queue.apply_pending(&mut self.browser);
        self.sync_focus();
        applied
    }

    fn take_redraw(&self) -> bool {
        std::mem::take(&mut self.view.borrow_mut().needs_redraw)
    }

    fn sync_focus(&mut self) {
        let Some(target) = self.view.borrow_mut().focus.take() else {
            return;
        };
        match target {
            FocusTarget::ConnectControl(_) => {
                self.pane = Pane::Connections;
                self.mode = InputMode::Normal;
            }
            FocusTarget::SettingsEditor(_) => self.mode = InputMode::Settings,
            FocusTarget::DatabaseList(id) => {
                self.pane = Pane::Databases;
                self.database_cursor = self
                    .browser
                    .connection(id)
                    .and_then(|slot| {
                        let selected = slot.selected_database()?;
                        slot.databases()
                            .iter()
                            .position(|entry| entry.name == selected)
                    })
                    .unwrap_or(0);
            }
            FocusTarget::ObjectList { .. } => {
                self.pane = Pane::Objects;
                self.object_cursor = 0;
            }
            FocusTarget::QueryEditor { .. } => {
                self.pane = Pane::Content;
                self.mode = InputMode::Editor;
            }
        }
    }

    fn active_slot(&self) -> Option<&ConnectionSlot> {
        self.browser.active_connection()
    }

    fn active_object(&self) -> Option<&ObjectSlot> {
        self.active_slot()?.selected_object()
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => self.next_pane(),
            Msg::Submit => self.submit(),
            Msg::Cancel => self.cancel(),
            Msg::Leave => self.leave(),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Disconnect => {
                if let Some(id) = self.browser.active() {
                    let result = self.browser.disconnect(id);
                    if self.report("disconnect", result).is_some() {
                        self.status_line = "Disconnected".to_string();
                    }
                }
            }
            Msg::EditSettings => self.open_settings(),
            Msg::ToggleSideBars => {
                if self.browser.toggle_side_bars() {
                    self.pane = Pane::Content;
                }
            }
            Msg::Retry => self.retry(),
            Msg::Input(character) => match self.mode {
                InputMode::Editor => self.editor_text.push(character),
                InputMode::Settings => {
                    if let Some(form) = &mut self.settings_form {
                        form.active_value_mut().push(character);
                    }
                }
                InputMode::Normal => {}
            },
            Msg::Backspace => match self.mode {
                InputMode::Editor => {
                    self.editor_text.pop();
                }
                InputMode::Settings => {
                    if let Some(form) = &mut self.settings_form {
                        form.active_value_mut().pop();
                    }
                }
                InputMode::Normal => {}
            },
        }
        self.sync_focus();
        self.view.borrow_mut().needs_redraw = true;
    }

    fn next_pane(&mut self) {
        match self.mode {
            InputMode::Settings => {
                if let Some(form) = &mut self.settings_form {
                    form.active_field = form.active_field.next();
                }
            }
            InputMode::Editor => {
                self.mode = InputMode::Normal;
                self.pane = self.pane.next(self.browser.settings().hide_side_bars);
            }
            InputMode::Normal => {
                self.pane = self.pane.next(self.browser.settings().hide_side_bars);
            }
        }
    }

    fn submit(&mut self) {
        let Some(id) = self.browser.active() else {
            return;
        };
        match (self.mode, self.pane) {
            (InputMode::Settings, _) => self.apply_settings(),
            (InputMode::Editor, _) => {
                let Some(database) = self.selected_database() else {
                    return;
                };
                let sql = self.editor_text.clone();
                let result = self.browser.run_query(id, &database, &sql);
                if self.report("run query", result).is_some() {
                    self.status_line = "Running query...".to_string();
                }
            }
            (InputMode::Normal, Pane::Connections) => {
                let result = self.browser.connect(id);
                if self.report("connect", result).is_some() {
                    self.status_line = format!("Connecting to {}...", self.connection_name());
                }
            }
            (InputMode::Normal, Pane::Databases) => {
                let Some(database) = self
                    .active_slot()
                    .and_then(|slot| slot.databases().get(self.database_cursor))
                    .map(|entry| entry.name.clone())
                else {
                    return;
                };
                let result = self.browser.select_database(id, &database);
                self.report("open database", result);
            }
            (InputMode::Normal, Pane::Objects) => {
                let Some(database) = self.selected_database() else {
                    return;
                };
                let result = self.browser.select_entry(id, &database, self.object_cursor);
                self.report("select table", result);
            }
            (InputMode::Normal, Pane::Content) => {
                if self
                    .active_object()
                    .and_then(ObjectSlot::selected_key)
                    .is_some_and(|key| key == PaneKey::Editor)
                {
                    self.mode = InputMode::Editor;
                }
            }
        }
    }

    fn cancel(&mut self) {
        let Some(id) = self.browser.active() else {
            return;
        };
        let result = match (self.pane, self.selected_database()) {
            (Pane::Objects | Pane::Content, Some(database)) => {
                let listing = self
                    .active_object()
                    .is_some_and(ObjectSlot::has_pending_task);
                let key = self.active_object().and_then(ObjectSlot::selected_key);
                match key {
                    _ if listing => self.browser.cancel_database(id, &database),
                    Some(key) => self.browser.cancel_query(id, &database, &key),
                    None => Ok(false),
                }
            }
            _ => self.browser.cancel(id),
        };
        match self.report("cancel", result) {
            Some(true) => self.status_line = "Cancel requested".to_string(),
            Some(false) => self.status_line = "Nothing to cancel".to_string(),
            None => {}
        }
    }

    fn leave(&mut self) {
        match self.mode {
            InputMode::Editor => self.mode = InputMode::Normal,
            InputMode::Settings => {
                if let Some(form) = self.settings_form.take() {
                    let result = self.browser.cancel_settings(form.slot);
                    self.report("cancel settings", result);
                }
                self.mode = InputMode::Normal;
            }
            InputMode::Normal => self.show_help = false,
        }
    }

    fn retry(&mut self) {
        let Some(id) = self.browser.active() else {
            return;
        };
        match self.pane {
            Pane::Connections | Pane::Databases => {
                let result = self.browser.connect(id);
                self.report("retry", result);
            }
            Pane::Objects => {
                if let Some(database) = self.selected_database() {
                    let result = self.browser.select_database(id, &database);
                    self.report("retry", result);
                }
            }
            Pane::Content => {
                let key = self.active_object().and_then(ObjectSlot::selected_key);
                if let (Some(database), Some(key)) = (self.selected_database(), key) {
                    let result = self.browser.rerun(id, &database, &key);
                    self.report("retry", result);
                }
            }
        }
    }

    fn navigate(&mut self, direction: DirectionKey) {
        if self.mode == InputMode::Settings {
            if let Some(form) = &mut self.settings_form {
                form.active_field = match direction {
                    DirectionKey::Up => form.active_field.previous(),
                    DirectionKey::Down => form.active_field.next(),
                };
            }
            return;
        }

        match self.pane {
            Pane::Connections => {
                let count = self.browser.connections().len();
                self.connection_cursor = step(self.connection_cursor, count, direction);
                if let Some(id) = self
                    .browser
                    .connections()
                    .get(self.connection_cursor)
                    .map(ConnectionSlot::id)
                {
                    let result = self.browser.activate(id);
                    self.report("select connection", result);
                    self.view.borrow_mut().focus = None;
                    self.database_cursor = 0;
                    self.object_cursor = 0;
                }
            }
            Pane::Databases => {
                let count = self.active_slot().map_or(0, |slot| slot.databases().len());
                self.database_cursor = step(self.database_cursor, count, direction);
            }
            Pane::Objects => {
                let count = self.active_object().map_or(0, |object| object.entries().len());
                self.object_cursor = step(self.object_cursor, count, direction);
            }
            Pane::Content => {}
        }
    }

    fn open_settings(&mut self) {
        let Some(id) = self.browser.active() else {
            return;
        };
        let result = self.browser.edit_settings(id);
        if self.report("edit settings", result).is_none() {
            return;
        }
        if let Some(slot) = self.browser.connection(id) {
            self.settings_form = Some(SettingsForm::from_config(id, slot.config()));
        }
        self.pane = Pane::Content;
    }

    fn apply_settings(&mut self) {
        let Some(form) = self.settings_form.clone() else {
            return;
        };
        let config = match form.to_config() {
            Ok(config) => config,
            Err(message) => {
                self.status_line = message;
                return;
            }
        };

        let result = self.browser.apply_settings(form.slot, config.clone());
        if self.report("apply settings", result).is_none() {
            return;
        }
        self.settings_form = None;
        self.mode = InputMode::Normal;
        self.status_line = format!("Connecting to {}...", config.name);

        if let Some(store) = &mut self.store {
            store.replace_connection(&form.base.name, config);
            if let Err(error) = store.persist() {
                tracing::warn!(%error, "failed to save connection settings");
                self.status_line = format!("Settings applied but not saved: {error}");
            }
        }
    }

    fn selected_database(&self) -> Option<String> {
        self.active_slot()?.selected_database().map(str::to_string)
    }

    fn connection_name(&self) -> String {
        self.active_slot()
            .map(|slot| slot.config().name.clone())
            .unwrap_or_default()
    }

    fn report<T>(&mut self, action: &str, result: Result<T, SlotError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.status_line = format!("Cannot {action}: {error}");
                None
            }
        }
    }
}

fn step(cursor: usize, count: usize, direction: DirectionKey) -> usize {
    if count == 0 {
        return 0;
    }
    match direction {
        DirectionKey::Up => cursor.saturating_sub(1),
        DirectionKey::Down => (cursor + 1).min(count - 1),
    }
}

fn placeholder_connection() -> ConnectionConfig {
    let user = std::env::var("USER").unwrap_or_else(|_| "postgres".to_string());
    ConnectionConfig::new("local", Dialect::Postgres, "localhost", user)
}

pub fn run(store: FileProfilesStore) -> Result<(), TuiError> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("dbrowse-worker")
        .build()?;
    let settings = store.settings();
    let connections = store.connections().to_vec();
    let driver: Arc<dyn DatabaseDriver> = Arc::new(SqlDriver::new(runtime.handle().clone()));
    let mut app = TuiApp::new(
        driver,
        runtime.handle().clone(),
        connections,
        settings,
        Some(store),
    );

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    app.browser.close_all();
    drop(app);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    loop {
        app.apply_updates();
        if app.take_redraw() {
            terminal.draw(|frame| render(frame, app))?;
        }

        if event::poll(TICK_RATE)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(message) = map_key_event(key, app.mode) {
                        app.handle(message);
                    }
                }
                Event::Resize(_, _) => app.view.borrow_mut().needs_redraw = true,
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let [left, right] = app.browser.split(chunks[1].width);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(left), Constraint::Length(right)])
        .split(chunks[1]);
    if left > 0 {
        render_side_bars(frame, app, body[0]);
    }
    render_content(frame, app, body[1]);

    let footer = Paragraph::new(vec![
        Line::from(key_hints(app)),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let slot = app.active_slot();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Pane: {} ", app.pane.title()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "Connection: {}",
            slot.map_or("-", |slot| slot.config().name.as_str())
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "DB: {}",
            slot.and_then(ConnectionSlot::selected_database)
                .unwrap_or("-")
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "State: {}",
            slot.map_or_else(|| "-".to_string(), |slot| slot.status().to_string())
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("dbrowse"));
    frame.render_widget(header, area);
}

fn render_side_bars(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(35),
            Constraint::Percentage(40),
        ])
        .split(area);

    let connections = app
        .browser
        .connections()
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            list_line(
                index == app.connection_cursor,
                format!("{} [{}]", slot.config().name, short_status(slot.status())),
            )
        })
        .collect::<Vec<_>>();
    render_list(frame, app, Pane::Connections, connections, sections[0]);

    let databases = app
        .active_slot()
        .map(|slot| entry_lines(slot.databases(), app.database_cursor))
        .unwrap_or_default();
    render_list(frame, app, Pane::Databases, databases, sections[1]);

    let objects = app
        .active_object()
        .map(|object| match object.status() {
            SlotStatus::Ready => entry_lines(object.entries(), app.object_cursor),
            status => vec![Line::from(status.to_string())],
        })
        .unwrap_or_default();
    render_list(frame, app, Pane::Objects, objects, sections[2]);
}

fn render_list(
    frame: &mut Frame<'_>,
    app: &TuiApp,
    pane: Pane,
    lines: Vec<Line<'static>>,
    area: Rect,
) {
    let mut block = Block::default().borders(Borders::ALL).title(pane.title());
    if app.pane == pane {
        block = block.border_style(Style::default().fg(Color::Yellow));
    }
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn list_line(selected: bool, text: String) -> Line<'static> {
    let marker = if selected { ">" } else { " " };
    Line::from(format!("{marker} {text}"))
}

fn entry_lines(entries: &[CatalogEntry], cursor: usize) -> Vec<Line<'static>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let marker = entry.kind.marker();
            let text = if marker.is_empty() {
                entry.name.clone()
            } else {
                format!("{marker} {}", entry.name)
            };
            list_line(index == cursor, text)
        })
        .collect()
}

fn short_status(status: &SlotStatus) -> &'static str {
    match status {
        SlotStatus::Disconnected => "off",
        SlotStatus::Connecting => "connecting",
        SlotStatus::Listing => "listing",
        SlotStatus::Ready => "ready",
        SlotStatus::Error(_) => "error",
    }
}

fn render_content(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let height = usize::from(area.height.saturating_sub(2));
    let (title, lines) = if let Some(form) = &app.settings_form {
        ("Connection settings".to_string(), settings_lines(form))
    } else {
        content_lines(app, height)
    };

    let mut block = Block::default().borders(Borders::ALL).title(title);
    if app.pane == Pane::Content {
        block = block.border_style(Style::default().fg(Color::Yellow));
    }
    let body = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Left);
    frame.render_widget(body, area);
}

fn settings_lines(form: &SettingsForm) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from("Tab / arrows: switch field | Enter: save and connect | Esc: cancel"),
        Line::from(""),
    ];
    for field in SettingsField::ALL {
        lines.push(list_line(
            form.active_field == field,
            format!("{}: {}", field.label(), form.value(field)),
        ));
    }
    lines
}

fn content_lines(app: &TuiApp, height: usize) -> (String, Vec<Line<'static>>) {
    let Some(slot) = app.active_slot() else {
        return ("Content".to_string(), vec![Line::from("No connection")]);
    };
    match slot.status() {
        SlotStatus::Disconnected => {
            return (
                slot.config().name.clone(),
                vec![
                    Line::from(format!(
                        "{} {}@{}:{}",
                        slot.config().dialect,
                        slot.config().user,
                        slot.config().host,
                        slot.config().port()
                    )),
                    Line::from("Enter: connect | e: edit settings"),
                ],
            );
        }
        SlotStatus::Connecting | SlotStatus::Listing => {
            return (
                slot.config().name.clone(),
                vec![
                    Line::from(format!("{}...", slot.status())),
                    Line::from("Ctrl+C: cancel"),
                ],
            );
        }
        SlotStatus::Error(message) => {
            return (
                slot.config().name.clone(),
                vec![
                    Line::from(Span::styled(
                        message.clone(),
                        Style::default().fg(Color::Red),
                    )),
                    Line::from("Enter / r: retry | e: edit settings"),
                ],
            );
        }
        SlotStatus::Ready => {}
    }

    let Some(object) = slot.selected_object() else {
        return (
            slot.config().name.clone(),
            vec![Line::from("Select a database")],
        );
    };
    if !object.status().is_ready() {
        let mut lines = vec![Line::from(object.status().to_string())];
        if matches!(object.status(), SlotStatus::Error(_)) {
            lines.push(Line::from("r: retry"));
        }
        return (object.database().to_string(), lines);
    }

    match object.selected_key() {
        Some(PaneKey::Editor) => {
            let mut lines = vec![
                Line::from(format!(
                    "{}{}",
                    app.editor_text,
                    if app.mode == InputMode::Editor { "_" } else { "" }
                )),
                Line::from(""),
            ];
            lines.extend(pane_lines(
                object.editor().status(),
                height.saturating_sub(2),
            ));
            ("SQL".to_string(), lines)
        }
        Some(key) => {
            let lines = object
                .pane(&key)
                .map(|pane| pane_lines(pane.status(), height))
                .unwrap_or_default();
            let title = match key {
                PaneKey::Relation(name) => name,
                PaneKey::Editor => "SQL".to_string(),
            };
            (title, lines)
        }
        None => (object.database().to_string(), Vec::new()),
    }
}

fn pane_lines(status: &PaneStatus, height: usize) -> Vec<Line<'static>> {
    match status {
        PaneStatus::Idle => vec![Line::from("Enter: run")],
        PaneStatus::Running => vec![Line::from("Running... (Ctrl+C: cancel)")],
        PaneStatus::Error(message) => vec![
            Line::from(Span::styled(
                message.clone(),
                Style::default().fg(Color::Red),
            )),
            Line::from("r: retry"),
        ],
        PaneStatus::Ready(result) => result_lines(result, height),
    }
}

fn result_lines(result: &QueryResult, height: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::with_capacity(height.min(result.rows.len() + 2));
    if !result.columns.is_empty() {
        lines.push(Line::from(Span::styled(
            result.columns.join(" | "),
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    let visible = height.saturating_sub(lines.len() + 1);
    lines.extend(
        result
            .rows
            .iter()
            .take(visible)
            .map(|row| Line::from(row.values.join(" | "))),
    );
    lines.push(Line::from(format!("({} rows)", result.rows.len())));
    lines
}

fn key_hints(app: &TuiApp) -> &'static str {
    match (app.mode, app.pane) {
        (InputMode::Settings, _) => "Tab: next field | Enter: apply | Esc: cancel",
        (InputMode::Editor, _) => "Enter: run | Ctrl+C: cancel | Esc: leave editor",
        (InputMode::Normal, Pane::Connections) => {
            "Enter: connect | d: disconnect | e: settings | Ctrl+C: cancel | b: side bars"
        }
        (InputMode::Normal, Pane::Databases) => "Enter: open database | Ctrl+C: cancel | q: quit",
        (InputMode::Normal, Pane::Objects) => "Enter: preview / open editor | r: retry | q: quit",
        (InputMode::Normal, Pane::Content) => "Enter: edit SQL | r: rerun | Ctrl+C: cancel",
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("q: quit"),
        Line::from("?: toggle help"),
        Line::from("Tab: cycle panes"),
        Line::from("Enter: connect, open, preview or run (by pane)"),
        Line::from("Ctrl+C: cancel the running task"),
        Line::from("Arrows or jk: navigation"),
        Line::from("d: disconnect | e: edit connection settings"),
        Line::from("r: retry | b: toggle side bars"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Msg::Cancel),
            _ => None,
        };
    }

    match mode {
        InputMode::Normal => match key.code {
            KeyCode::Char('q') => Some(Msg::Quit),
            KeyCode::Char('?') => Some(Msg::ToggleHelp),
            KeyCode::Tab => Some(Msg::NextPane),
            KeyCode::Enter => Some(Msg::Submit),
            KeyCode::Esc => Some(Msg::Leave),
            KeyCode::Char('d') => Some(Msg::Disconnect),
            KeyCode::Char('e') => Some(Msg::EditSettings),
            KeyCode::Char('b') => Some(Msg::ToggleSideBars),
            KeyCode::Char('r') => Some(Msg::Retry),
            KeyCode::Up | KeyCode::Char('k') => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Down | KeyCode::Char('j') => Some(Msg::Navigate(DirectionKey::Down)),
            _ => None,
        },
        InputMode::Editor | InputMode::Settings => match key.code {
            KeyCode::Esc => Some(Msg::Leave),
            KeyCode::Enter => Some(Msg::Submit),
            KeyCode::Tab => Some(Msg::NextPane),
            KeyCode::Backspace => Some(Msg::Backspace),
            KeyCode::Up => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Down => Some(Msg::Navigate(DirectionKey::Down)),
            KeyCode::Char(character) => Some(Msg::Input(character)),
            _ => None,
        },
    }
}
