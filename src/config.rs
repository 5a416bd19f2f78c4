//! Socket configuration plus an optional TOML loader for standalone
//! deployments, two-stage the way this codebase's services split a
//! `RawConfig` into a validated config struct.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::node_id::NodeId;

#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: NodeId,
    pub heartbeat_interval: Duration,
    pub heartbeat_max_missed: u32,
    pub initialization_timeout: Duration,
    pub ack_timeout: Duration,
    pub batch_enabled: bool,
    pub batch_max_letters_in_batch: usize,
    pub batch_max_extended_batch_count: usize,
    pub connect_backoff_initial: Duration,
    pub connect_backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: NodeId::random(),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_max_missed: 3,
            initialization_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            batch_enabled: false,
            batch_max_letters_in_batch: 100,
            batch_max_extended_batch_count: 100,
            connect_backoff_initial: Duration::from_millis(200),
            connect_backoff_max: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config::default(),
            extended_batch_count_explicit: false,
        }
    }
}

/// Builder-style setters for library embedders who construct a `Config`
/// directly rather than loading TOML. Tracks whether
/// `batch_max_extended_batch_count` was set explicitly so that, left
/// unset, it keeps tracking whatever `batch_max_letters_in_batch`
/// resolves to (spec default: the two are equal) instead of pinning the
/// stock default.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
    extended_batch_count_explicit: bool,
}

impl ConfigBuilder {
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.config.node_id = node_id;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_max_missed(mut self, max_missed: u32) -> Self {
        self.config.heartbeat_max_missed = max_missed;
        self
    }

    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.config.initialization_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    pub fn batch_enabled(mut self, enabled: bool) -> Self {
        self.config.batch_enabled = enabled;
        self
    }

    pub fn batch_max_letters_in_batch(mut self, max: usize) -> Self {
        self.config.batch_max_letters_in_batch = max;
        if !self.extended_batch_count_explicit {
            self.config.batch_max_extended_batch_count = max;
        }
        self
    }

    pub fn batch_max_extended_batch_count(mut self, max: usize) -> Self {
        self.config.batch_max_extended_batch_count = max;
        self.extended_batch_count_explicit = true;
        self
    }

    pub fn connect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.connect_backoff_initial = initial;
        self.config.connect_backoff_max = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// ---------------------------------------------------------------------------
// TOML loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    node_id: Option<String>,
    heartbeat: Option<RawHeartbeat>,
    initialization: Option<RawInitialization>,
    ack: Option<RawAck>,
    batch: Option<RawBatch>,
    connect: Option<RawConnect>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHeartbeat {
    interval_ms: Option<u64>,
    max_missed: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawInitialization {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAck {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawBatch {
    enabled: Option<bool>,
    max_letters_in_batch: Option<usize>,
    max_extended_batch_count: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConnect {
    backoff: Option<RawBackoff>,
}

#[derive(Debug, Deserialize, Default)]
struct RawBackoff {
    initial_ms: Option<u64>,
    max_ms: Option<u64>,
}

/// Parse a TOML document into a validated `Config`, falling back to
/// `Config::default()` for any section or field that is absent. Unknown
/// top-level keys are rejected by `toml`'s default strictness.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = Config::default();

    let node_id = match raw.node_id {
        Some(hex) => parse_node_id_hex(&hex)?,
        None => defaults.node_id,
    };

    let heartbeat = raw.heartbeat.unwrap_or_default();
    let initialization = raw.initialization.unwrap_or_default();
    let ack = raw.ack.unwrap_or_default();
    let batch = raw.batch.unwrap_or_default();
    let backoff = raw.connect.and_then(|c| c.backoff).unwrap_or_default();

    // An unset `max_extended_batch_count` tracks the *resolved*
    // `max_letters_in_batch`, not the independent stock default (spec.md
    // §6: "default equals MaxLettersInBatch").
    let batch_max_letters_in_batch = batch.max_letters_in_batch.unwrap_or(defaults.batch_max_letters_in_batch);
    let batch_max_extended_batch_count = batch.max_extended_batch_count.unwrap_or(batch_max_letters_in_batch);

    Ok(Config {
        node_id,
        heartbeat_interval: heartbeat
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat_interval),
        heartbeat_max_missed: heartbeat.max_missed.unwrap_or(defaults.heartbeat_max_missed),
        initialization_timeout: initialization
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initialization_timeout),
        ack_timeout: ack.timeout_ms.map(Duration::from_millis).unwrap_or(defaults.ack_timeout),
        batch_enabled: batch.enabled.unwrap_or(defaults.batch_enabled),
        batch_max_letters_in_batch,
        batch_max_extended_batch_count,
        connect_backoff_initial: backoff
            .initial_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_backoff_initial),
        connect_backoff_max: backoff.max_ms.map(Duration::from_millis).unwrap_or(defaults.connect_backoff_max),
    })
}

pub fn load_config_from_path(path: &std::path::Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&contents)
}

fn parse_node_id_hex(hex: &str) -> Result<NodeId, ConfigError> {
    if hex.len() != 32 {
        return Err(ConfigError::InvalidValue(
            "node_id".to_owned(),
            "expected 32 hex characters".to_owned(),
        ));
    }
    let mut bytes = [0u8; 16];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| ConfigError::InvalidValue("node_id".to_owned(), format!("invalid hex pair '{pair}'")))?;
    }
    Ok(NodeId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let cfg = Config::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_max_missed, 3);
        assert_eq!(cfg.initialization_timeout, Duration::from_secs(5));
        assert_eq!(cfg.ack_timeout, Duration::from_secs(5));
        assert!(!cfg.batch_enabled);
        assert_eq!(cfg.batch_max_letters_in_batch, 100);
        assert_eq!(cfg.batch_max_extended_batch_count, 100);
    }

    #[test]
    fn empty_toml_yields_defaults_besides_node_id() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn partial_sections_fall_back_per_field() {
        let cfg = load_config_from_str(
            r#"
            [heartbeat]
            interval_ms = 250

            [batch]
            enabled = true
            max_letters_in_batch = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(cfg.heartbeat_max_missed, 3); // fell back
        assert!(cfg.batch_enabled);
        assert_eq!(cfg.batch_max_letters_in_batch, 5);
        assert_eq!(cfg.batch_max_extended_batch_count, 5); // tracks max_letters_in_batch, not the stock default
    }

    #[test]
    fn builder_tracks_extended_batch_count_unless_set_explicitly() {
        let tracked = Config::builder().batch_max_letters_in_batch(7).build();
        assert_eq!(tracked.batch_max_extended_batch_count, 7);

        let overridden = Config::builder()
            .batch_max_extended_batch_count(40)
            .batch_max_letters_in_batch(7)
            .build();
        assert_eq!(overridden.batch_max_extended_batch_count, 40);
    }

    #[test]
    fn explicit_node_id_round_trips() {
        let hex = "00112233445566778899aabbccddeeff".chars().take(32).collect::<String>();
        let cfg = load_config_from_str(&format!("node_id = \"{hex}\"")).unwrap();
        assert_eq!(cfg.node_id.to_string(), hex);
    }

    #[test]
    fn malformed_node_id_is_rejected() {
        let err = load_config_from_str("node_id = \"not-hex\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
    }

    #[test]
    fn unparseable_toml_is_rejected() {
        let err = load_config_from_str("not valid toml [[[").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
