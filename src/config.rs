use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context as _;
use serde::Deserialize;

use crate::namespace::{self, DEFAULT_NAMESPACE};

pub const PROJECT_CONFIG_FILENAME: &str = "intake.toml";
pub const HOME_CONFIG_DIR: &str = ".intake";
pub const HOME_CONFIG_FILENAME: &str = "config.toml";

const DEFAULT_STORAGE_PATH: &str = "data";
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub logging: Option<LoggingConfig>,
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Page served to requests that are not API calls.
    pub index_file: Option<PathBuf>,
    /// When set, `clear` requires a matching `x-intake-clear-token` header.
    pub clear_token: Option<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            index_file: None,
            clear_token: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            namespace: default_namespace(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Config {
    /// Loads `explicit_path` if given, otherwise the first of
    /// `./intake.toml` and `$HOME/.intake/config.toml` that exists, otherwise
    /// built-in defaults.
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            return Self::from_path(path);
        }

        let home = env::var_os("HOME").map(PathBuf::from);
        let cwd = env::current_dir().context("resolve current dir")?;
        match discover_config_path(&cwd, home.as_deref()) {
            Some(path) => Self::from_path(path),
            None => {
                tracing::debug!("no config file found; using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let mut config = Self::from_toml_str(&toml)
            .with_context(|| format!("load config {}", path.display()))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn apply_namespace_override(&mut self, namespace: Option<&str>) -> anyhow::Result<()> {
        let Some(namespace) = namespace else {
            return Ok(());
        };
        namespace::validate_namespace(namespace)
            .with_context(|| format!("invalid --namespace `{namespace}`"))?;
        self.storage.namespace = namespace.to_owned();
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s).context("parse config TOML")?;
        namespace::validate_namespace(&config.storage.namespace)
            .context("invalid `storage.namespace`")?;
        if config.server.max_body_bytes == 0 {
            anyhow::bail!("`server.max_body_bytes` must be greater than zero");
        }
        Ok(config)
    }
}

fn discover_config_path(cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let project = cwd.join(PROJECT_CONFIG_FILENAME);
    if project.is_file() {
        return Some(project);
    }
    let home_config = home?.join(HOME_CONFIG_DIR).join(HOME_CONFIG_FILENAME);
    home_config.is_file().then_some(home_config)
}
