use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Daemon bootstrap options: read from CLI flags, layered over an optional
/// config file, per SPEC_FULL §1's ambient configuration section. These are
/// fixed for the process lifetime — unlike `RuntimeConfig`, they are not
/// exposed through the control surface's `config` table.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: std::path::PathBuf,
    pub verbose: bool,
}

impl DaemonConfig {
    #[must_use]
    pub fn db_path(&self) -> std::path::PathBuf {
        self.data_dir.join("loadcore.db")
    }

    #[must_use]
    pub fn pid_path(&self) -> std::path::PathBuf {
        self.data_dir.join("loadcore.pid")
    }
}

/// The runtime configuration surface of spec.md §6: keys the control
/// surface can list and (through the `config` persistence table) persist
/// across restarts. Every field has a fixed effect named in the spec's
/// table; `RuntimeConfig` is the daemon-wide default applied when a run
/// doesn't override a field itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub default_timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub stats_interval_ms: u64,
    pub context_pool_size: usize,
    pub max_in_flight: usize,
    pub sample_reservoir_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            follow_redirects: true,
            max_redirects: 10,
            stats_interval_ms: 100,
            context_pool_size: 8,
            max_in_flight: 256,
            sample_reservoir_size: 10_000,
        }
    }
}

/// One row of the "list configuration entries" endpoint (spec.md §6):
/// the runtime config surface described generically enough for the
/// external UI to render a settings form without a second schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: &'static str,
    pub category: &'static str,
    pub default: Value,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl RuntimeConfig {
    /// Renders the current configuration as the listable entries the
    /// control surface's `GET /config` exposes.
    #[must_use]
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let defaults = Self::default();
        vec![
            ConfigEntry {
                key: "default_timeout_ms".to_owned(),
                value: Value::from(self.default_timeout_ms),
                value_type: "integer",
                category: "transport",
                default: Value::from(defaults.default_timeout_ms),
                min: Some(Value::from(1)),
                max: None,
            },
            ConfigEntry {
                key: "follow_redirects".to_owned(),
                value: Value::from(self.follow_redirects),
                value_type: "boolean",
                category: "transport",
                default: Value::from(defaults.follow_redirects),
                min: None,
                max: None,
            },
            ConfigEntry {
                key: "max_redirects".to_owned(),
                value: Value::from(self.max_redirects),
                value_type: "integer",
                category: "transport",
                default: Value::from(defaults.max_redirects),
                min: Some(Value::from(0)),
                max: Some(Value::from(50)),
            },
            ConfigEntry {
                key: "stats_interval_ms".to_owned(),
                value: Value::from(self.stats_interval_ms),
                value_type: "integer",
                category: "metrics",
                default: Value::from(defaults.stats_interval_ms),
                min: Some(Value::from(10)),
                max: None,
            },
            ConfigEntry {
                key: "context_pool_size".to_owned(),
                value: Value::from(self.context_pool_size),
                value_type: "integer",
                category: "script",
                default: Value::from(defaults.context_pool_size),
                min: Some(Value::from(1)),
                max: None,
            },
            ConfigEntry {
                key: "max_in_flight".to_owned(),
                value: Value::from(self.max_in_flight),
                value_type: "integer",
                category: "event_loop",
                default: Value::from(defaults.max_in_flight),
                min: Some(Value::from(1)),
                max: None,
            },
            ConfigEntry {
                key: "sample_reservoir_size".to_owned(),
                value: Value::from(self.sample_reservoir_size),
                value_type: "integer",
                category: "sampling",
                default: Value::from(defaults.sample_reservoir_size),
                min: Some(Value::from(0)),
                max: None,
            },
        ]
    }

    /// Applies a single key/value override from the persisted `config`
    /// table or a request body. Unknown keys are ignored rather than
    /// rejected — forward compatibility with a newer UI that knows about
    /// keys this build doesn't.
    pub fn set(&mut self, key: &str, value: &Value) {
        match key {
            "default_timeout_ms" => {
                if let Some(v) = value.as_u64() {
                    self.default_timeout_ms = v;
                }
            }
            "follow_redirects" => {
                if let Some(v) = value.as_bool() {
                    self.follow_redirects = v;
                }
            }
            "max_redirects" => {
                if let Some(v) = value.as_u64() {
                    self.max_redirects = v as u32;
                }
            }
            "stats_interval_ms" => {
                if let Some(v) = value.as_u64() {
                    self.stats_interval_ms = v;
                }
            }
            "context_pool_size" => {
                if let Some(v) = value.as_u64() {
                    self.context_pool_size = v as usize;
                }
            }
            "max_in_flight" => {
                if let Some(v) = value.as_u64() {
                    self.max_in_flight = v as usize;
                }
            }
            "sample_reservoir_size" => {
                if let Some(v) = value.as_u64() {
                    self.sample_reservoir_size = v as usize;
                }
            }
            _ => {}
        }
    }
}

/// On-disk config file layered under CLI flags, mirroring the teacher's
/// `ConfigFile` (`strest.toml`/`strest.json`) but scoped to this daemon's
/// bootstrap and runtime surface.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    #[serde(flatten)]
    pub runtime: PartialRuntimeConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialRuntimeConfig {
    pub default_timeout_ms: Option<u64>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub stats_interval_ms: Option<u64>,
    pub context_pool_size: Option<usize>,
    pub max_in_flight: Option<usize>,
    pub sample_reservoir_size: Option<usize>,
}

impl PartialRuntimeConfig {
    pub fn apply_to(&self, runtime: &mut RuntimeConfig) {
        if let Some(v) = self.default_timeout_ms {
            runtime.default_timeout_ms = v;
        }
        if let Some(v) = self.follow_redirects {
            runtime.follow_redirects = v;
        }
        if let Some(v) = self.max_redirects {
            runtime.max_redirects = v;
        }
        if let Some(v) = self.stats_interval_ms {
            runtime.stats_interval_ms = v;
        }
        if let Some(v) = self.context_pool_size {
            runtime.context_pool_size = v;
        }
        if let Some(v) = self.max_in_flight {
            runtime.max_in_flight = v;
        }
        if let Some(v) = self.sample_reservoir_size {
            runtime.sample_reservoir_size = v;
        }
    }
}
