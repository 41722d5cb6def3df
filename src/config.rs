use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub server: Option<ServerConfig>,
    pub engine: Option<EngineConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_debounce_ms")]
    pub staging_debounce_ms: i64,
    #[serde(default = "default_launch_latency_ms")]
    pub launch_latency_ms: u64,
    #[serde(default = "default_side_launch_latency_ms")]
    pub side_launch_latency_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_launch_stagger_ms")]
    pub launch_stagger_ms: u64,
    #[serde(default = "default_pause_stagger_ms")]
    pub pause_stagger_ms: u64,
    #[serde(default = "default_feed_tick_ms")]
    pub feed_tick_ms: u64,
}

fn default_db_path() -> String {
    "desk_state.redb".to_string()
}

fn default_debounce_ms() -> i64 {
    crate::staging::DEFAULT_DEBOUNCE_MS
}

fn default_launch_latency_ms() -> u64 {
    300
}

fn default_side_launch_latency_ms() -> u64 {
    250
}

fn default_batch_size() -> usize {
    2
}

fn default_launch_stagger_ms() -> u64 {
    150
}

fn default_pause_stagger_ms() -> u64 {
    100
}

fn default_feed_tick_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            staging_debounce_ms: default_debounce_ms(),
            launch_latency_ms: default_launch_latency_ms(),
            side_launch_latency_ms: default_side_launch_latency_ms(),
            batch_size: default_batch_size(),
            launch_stagger_ms: default_launch_stagger_ms(),
            pause_stagger_ms: default_pause_stagger_ms(),
            feed_tick_ms: default_feed_tick_ms(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            // 1. Global config from ~/.desk/config.json
            .add_source(File::with_name(&format!("{}/.desk/config", home)).required(false))
            // 2. Project config from config/config.json
            .add_source(File::with_name("config/config").required(false))
            // 3. Local overrides (not checked in)
            .add_source(File::with_name("config/local").required(false))
            // 4. Environment overrides, e.g. DESK_ENGINE__STAGING_DEBOUNCE_MS
            .add_source(Environment::with_prefix("DESK").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }
}
