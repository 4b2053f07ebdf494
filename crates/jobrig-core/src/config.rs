use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_ALIAS: &str = "jobrig-local";
pub const DEFAULT_NAME_PREFIX: &str = "test_";
pub const DEFAULT_TEARDOWN_ATTEMPTS: u32 = 4;
pub const DEFAULT_TEARDOWN_BACKOFF_MS: u64 = 300;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000; // a hung rendezvous fails after 30s
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_THREAD_COUNT: usize = 4;

/// Top-level config (jobrig.toml + JOBRIG_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment,
/// e.g. `JOBRIG_PROVISIONER__TEARDOWN__MAX_ATTEMPTS=2`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobrigConfig {
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub rendezvous: RendezvousConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Ephemeral database provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Alias of the administrative server used for create/drop.
    #[serde(default = "default_server_alias")]
    pub server_alias: String,
    /// Prefix of generated database names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Directory holding backing files. Falls back to the host temp dir.
    pub scratch_dir: Option<String>,
    #[serde(default)]
    pub teardown: TeardownConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            server_alias: default_server_alias(),
            name_prefix: default_name_prefix(),
            scratch_dir: None,
            teardown: TeardownConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Retry policy applied when dropping a database at teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownConfig {
    /// Total number of drop attempts, including the first one.
    #[serde(default = "default_teardown_attempts")]
    pub max_attempts: u32,
    /// Upper bound of the uniformly random delay between attempts.
    #[serde(default = "default_teardown_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_teardown_attempts(),
            max_backoff_ms: default_teardown_backoff_ms(),
        }
    }
}

impl TeardownConfig {
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Bounds for rendezvous waits. `0` means wait forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousConfig {
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default)]
    pub continue_timeout_ms: u64,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            continue_timeout_ms: 0,
        }
    }
}

impl RendezvousConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.wait_timeout_ms)
    }

    pub fn continue_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.continue_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// How often the engine looks for due triggers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of jobs executing at once.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            poll_interval_ms: default_poll_interval_ms(),
            thread_count: default_thread_count(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn default_server_alias() -> String {
    DEFAULT_SERVER_ALIAS.to_string()
}
fn default_name_prefix() -> String {
    DEFAULT_NAME_PREFIX.to_string()
}
fn default_teardown_attempts() -> u32 {
    DEFAULT_TEARDOWN_ATTEMPTS
}
fn default_teardown_backoff_ms() -> u64 {
    DEFAULT_TEARDOWN_BACKOFF_MS
}
fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}
fn default_instance_name() -> String {
    "jobrig".to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_thread_count() -> usize {
    DEFAULT_THREAD_COUNT
}

impl JobrigConfig {
    /// Load config: explicit path > JOBRIG_CONFIG env > ./jobrig.toml.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("JOBRIG_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("JOBRIG_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    "jobrig.toml".to_string()
}
