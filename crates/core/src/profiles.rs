use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::catalog::Dialect;
use crate::task::TASK_DEADLINE;

pub const DEFAULT_PASSWORD_ENV: &str = "DBROWSE_PASSWORD";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
    VerifyIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub name: String,
    #[serde(default, alias = "type")]
    pub dialect: Dialect,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub password_env: Option<String>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dialect: Dialect,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dialect,
            host: host.into(),
            port: None,
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            password_env: None,
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.dialect.catalog().default_port)
    }

    #[must_use]
    pub fn connection_string(&self, database: Option<&str>) -> String {
        let variable = self
            .password_env
            .as_deref()
            .unwrap_or(DEFAULT_PASSWORD_ENV);
        let password = env::var(variable).ok().filter(|pw| !pw.is_empty());
        self.connection_string_with_password(database, password.as_deref())
    }

    #[must_use]
    pub fn connection_string_with_password(
        &self,
        database: Option<&str>,
        password: Option<&str>,
    ) -> String {
        match self.dialect {
            Dialect::Postgres | Dialect::Mysql => self.url_string(database, password),
            Dialect::SqlServer => self.ado_string(database, password),
        }
    }

    fn url_string(&self, database: Option<&str>, password: Option<&str>) -> String {
        let scheme = match self.dialect {
            Dialect::Mysql => "mysql",
            Dialect::Postgres | Dialect::SqlServer => "postgres",
        };
        let Ok(mut url) = Url::parse(&format!("{scheme}://{}:{}", self.host, self.port())) else {
            return format!("{scheme}://{}:{}", self.host, self.port());
        };
        let _ = url.set_username(&self.user);
        if let Some(password) = password {
            let _ = url.set_password(Some(password));
        }
        url.set_path(database.unwrap_or_default());

        {
            let mut query = url.query_pairs_mut();
            match (self.dialect, self.tls_mode) {
                (Dialect::Postgres, mode) => {
                    query.append_pair(
                        "sslmode",
                        match mode {
                            TlsMode::Disabled => "disable",
                            TlsMode::Prefer => "prefer",
                            TlsMode::Require => "require",
                            TlsMode::VerifyIdentity => "verify-full",
                        },
                    );
                }
                (Dialect::Mysql, TlsMode::Require) => {
                    query.append_pair("require_ssl", "true");
                }
                (Dialect::Mysql, TlsMode::VerifyIdentity) => {
                    query.append_pair("require_ssl", "true");
                    query.append_pair("verify_identity", "true");
                }
                _ => {}
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url.into()
    }

    fn ado_string(&self, database: Option<&str>, password: Option<&str>) -> String {
        let mut parts = vec![
            format!("server=tcp:{},{}", self.host, self.port()),
            format!("user={}", ado_value(&self.user)),
        ];
        if let Some(password) = password {
            parts.push(format!("password={}", ado_value(password)));
        }
        if let Some(database) = database {
            parts.push(format!("database={}", ado_value(database)));
        }
        let (encrypt, trust) = match self.tls_mode {
            TlsMode::Disabled => ("false", true),
            TlsMode::Prefer | TlsMode::Require => ("true", true),
            TlsMode::VerifyIdentity => ("true", false),
        };
        parts.push(format!("encrypt={encrypt}"));
        if trust {
            parts.push("TrustServerCertificate=true".to_string());
        }
        parts.join(";")
    }
}

fn ado_value(value: &str) -> String {
    if value.contains([';', '{', '}', '=']) {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserSettings {
    #[serde(default = "default_sidebar_width")]
    pub sidebar_width: u16,
    #[serde(default)]
    pub hide_side_bars: bool,
    #[serde(default = "default_task_deadline_secs")]
    pub task_deadline_secs: u64,
}

impl BrowserSettings {
    #[must_use]
    pub fn task_deadline(&self) -> Duration {
        Duration::from_secs(self.task_deadline_secs.max(1))
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            sidebar_width: default_sidebar_width(),
            hide_side_bars: false,
            task_deadline_secs: default_task_deadline_secs(),
        }
    }
}

fn default_sidebar_width() -> u16 {
    30
}

fn default_task_deadline_secs() -> u64 {
    TASK_DEADLINE.as_secs()
}

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read profiles file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profiles file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize profiles: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write profiles file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesDocument {
    #[serde(default)]
    settings: BrowserSettings,
    #[serde(default)]
    connections: Vec<ConnectionConfig>,
}

impl ProfilesDocument {
    fn normalize(&mut self) {
        let mut by_name = std::collections::BTreeMap::new();
        for config in self.connections.drain(..) {
            by_name.insert(config.name.clone(), config);
        }
        self.connections = by_name.into_values().collect();
    }
}

#[derive(Debug, Clone)]
pub struct FileProfilesStore {
    path: PathBuf,
    settings: BrowserSettings,
    connections: Vec<ConnectionConfig>,
}

impl FileProfilesStore {
    pub fn load_default() -> Result<Self, ProfilesError> {
        let path = default_profiles_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ProfilesError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| ProfilesError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let mut doc: ProfilesDocument =
            toml::from_str(&raw).map_err(|source| ProfilesError::Parse {
                path: path.clone(),
                source,
            })?;
        doc.normalize();

        Ok(Self {
            path,
            settings: doc.settings,
            connections: doc.connections,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            settings: BrowserSettings::default(),
            connections: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> BrowserSettings {
        self.settings
    }

    #[must_use]
    pub fn connections(&self) -> &[ConnectionConfig] {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|config| config.name == name)
    }

    pub fn upsert_connection(&mut self, config: ConnectionConfig) {
        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|existing| existing.name == config.name)
        {
            *existing = config;
        } else {
            self.connections.push(config);
            self.connections.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        }
    }

    pub fn replace_connection(&mut self, previous_name: &str, config: ConnectionConfig) {
        if previous_name != config.name {
            self.connections.retain(|existing| existing.name != previous_name);
        }
        self.upsert_connection(config);
    }

    pub fn persist(&self) -> Result<(), ProfilesError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ProfilesError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = ProfilesDocument {
            settings: self.settings,
            connections: self.connections.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| ProfilesError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ProfilesError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_config_dir() -> Result<PathBuf, ProfilesError> {
    if let Some(custom) = env::var_os("DBROWSE_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ProfilesError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ProfilesError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("dbrowse"))
}

pub fn default_profiles_path() -> Result<PathBuf, ProfilesError> {
    Ok(default_config_dir()?.join("profiles.toml"))
}
