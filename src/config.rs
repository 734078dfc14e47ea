use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub catalogue: CatalogueConfig,
    pub state: StateConfig,
    pub invoke: InvokeConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    /// Schema store root: one sub-directory per server
    pub root: PathBuf,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("servers"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Session records, sockets and logs live under here
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { dir: data_dir() }
    }
}

impl StateConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.dir.join("sessions")
    }

    pub fn sockets_dir(&self) -> PathBuf {
        self.dir.join("sockets")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Bound on releasing a connection, for sessions too
    pub close_timeout_ms: u64,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60000,
            connect_timeout_ms: 30000,
            close_timeout_ms: 5000,
        }
    }
}

impl InvokeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// What a session does with a call that arrives while another is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the in-flight call to finish
    #[default]
    Queue,
    /// Reject with `SessionBusy`
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub call_timeout_ms: u64,
    pub start_timeout_ms: u64,
    /// Idle sessions are stopped after this long; 0 keeps them forever
    pub idle_timeout_secs: u64,
    pub busy_policy: BusyPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 120000,
            start_timeout_ms: 60000,
            idle_timeout_secs: 1800,
            busy_policy: BusyPolicy::Queue,
        }
    }
}

impl SessionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            catalogue: CatalogueConfig::default(),
            state: StateConfig::default(),
            invoke: InvokeConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Point the catalogue at a different schema store root
    pub fn with_catalogue_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.catalogue.root = root.into();
        self
    }

    /// Keep state (sessions, sockets, logs) under a different directory
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state.dir = dir.into();
        self
    }
}
