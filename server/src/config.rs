use lootrush_shared::config::GameConfig;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub rng_seed: u64,
    /// JSON file with round rules; defaults are used when absent
    pub game_config_path: Option<PathBuf>,
    /// Simulated players joined at startup
    pub bot_count: usize,
    /// Artificial delay of each simulated terrain cell load (ms)
    pub chunk_latency_ms: u64,
    /// Fraction of simulated cells that fail to load
    pub chunk_failure_rate: f64,
    /// Whether WebSocket clients may issue admin commands
    pub clients_are_operators: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9001".to_string(),
            rng_seed: 42,
            game_config_path: None,
            bot_count: 6,
            chunk_latency_ms: 5,
            chunk_failure_rate: 0.02,
            clients_are_operators: true,
        }
    }
}

fn env_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

impl ServerConfig {
    /// Defaults overridden by `LOOTRUSH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = env_var::<String>("LOOTRUSH_LISTEN_ADDR")? {
            config.listen_addr = addr;
        }
        if let Some(seed) = env_var("LOOTRUSH_SEED")? {
            config.rng_seed = seed;
        }
        if let Some(path) = env_var::<String>("LOOTRUSH_GAME_CONFIG")? {
            config.game_config_path = Some(PathBuf::from(path));
        }
        if let Some(bots) = env_var("LOOTRUSH_BOTS")? {
            config.bot_count = bots;
        }
        if let Some(latency) = env_var("LOOTRUSH_CHUNK_LATENCY_MS")? {
            config.chunk_latency_ms = latency;
        }
        if let Some(rate) = env_var("LOOTRUSH_CHUNK_FAILURE_RATE")? {
            config.chunk_failure_rate = rate;
        }
        if let Some(open) = env_var("LOOTRUSH_CLIENTS_ARE_OPERATORS")? {
            config.clients_are_operators = open;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.bot_count > 1000 {
            return Err("bot_count must be <= 1000".to_string());
        }
        if !(0.0..=1.0).contains(&self.chunk_failure_rate) {
            return Err("chunk_failure_rate must be in 0..=1".to_string());
        }
        if self.chunk_latency_ms > 10_000 {
            return Err("chunk_latency_ms must be <= 10000".to_string());
        }
        Ok(())
    }

    /// Round rules from `game_config_path`, or the defaults. Always validated.
    pub fn load_game_config(&self) -> Result<GameConfig, ConfigError> {
        let config = match &self.game_config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&raw)?
            }
            None => GameConfig::default(),
        };
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
