use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::podman::{
    DEFAULT_DRAIN_GRACE, DEFAULT_EVENT_BUFFER, DEFAULT_LIST_CONCURRENCY, DEFAULT_POD_CACHE_TTL,
    WatcherOptions,
};

/// Contents of `sealwatcher.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Podman service URI; when unset, the usual Podman defaults apply.
    pub socket: Option<String>,
    /// PID of the Podman service, when known.
    pub pid: Option<u32>,
    pub pod_cache_ttl_secs: u64,
    pub list_concurrency: usize,
    pub event_buffer: usize,
    pub drain_grace_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            socket: None,
            pid: None,
            pod_cache_ttl_secs: DEFAULT_POD_CACHE_TTL.as_secs(),
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            drain_grace_secs: DEFAULT_DRAIN_GRACE.as_secs(),
        }
    }
}

impl WatcherConfig {
    fn try_init_from_string(val: &str) -> Result<Self> {
        Ok(toml::from_str(val)?)
    }

    /// Reads the configuration file; a missing file means defaults.
    pub fn try_init_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(config) => Self::try_init_from_string(&config),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the configuration file named on the command line and applies
    /// the command line overrides.
    pub fn try_init() -> Result<Self> {
        let args = crate::cli::get_cli_args();
        let mut config = Self::try_init_from_path(&args.config)?;
        if let Some(socket) = args.socket.as_ref() {
            config.socket = Some(socket.clone());
        }
        if let Some(pid) = args.pid {
            config.pid = Some(pid);
        }
        Ok(config)
    }
}

impl From<&WatcherConfig> for WatcherOptions {
    fn from(config: &WatcherConfig) -> Self {
        let options = WatcherOptions::default()
            .with_pod_cache_ttl(Duration::from_secs(config.pod_cache_ttl_secs))
            .with_list_concurrency(config.list_concurrency)
            .with_event_buffer(config.event_buffer)
            .with_drain_grace(Duration::from_secs(config.drain_grace_secs));
        match config.pid {
            Some(pid) => options.with_pid(pid),
            None => options,
        }
    }
}
