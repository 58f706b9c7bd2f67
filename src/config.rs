//! Configuration management for the throttler.
//!
//! Limits are declared as a list of windows in YAML:
//!
//! ```yaml
//! name: api
//! units: requests
//! windows:
//!   - interval: quarter_min
//!     limit: 15
//!   - interval: day
//!     limit: 1000
//! tracker:
//!   max_clients: 10000
//!   idle_ttl_secs: 86400
//!   sweep_interval_secs: 60
//! policy: too_many_requests
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, ThrottlerError};
use crate::throttling::{
    AllowPolicy, DenyPolicy, LoggingPolicy, RejectionPolicy, ThrottleDefinitionSet,
    ThrottleInterval, ThrottleLimitDefinition, TimeSource, TokenBucketThrottler,
    TooManyRequestsPolicy, TrackerStoreSettings, DEFAULT_IDLE_TTL, DEFAULT_MAX_CLIENTS,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_THROTTLER_NAME, DEFAULT_UNITS,
};

/// Prefix of environment variables overriding file settings,
/// e.g. `THROTTLER__TRACKER__MAX_CLIENTS=500`.
pub const ENV_PREFIX: &str = "THROTTLER";

/// Main configuration for a throttler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Name reported by the throttler
    #[serde(default = "default_name")]
    pub name: String,

    /// Units label for windows that do not set their own
    #[serde(default = "default_units")]
    pub units: String,

    /// Windows enforced together, in evaluation order
    #[serde(default)]
    pub windows: Vec<WindowConfig>,

    /// Tracker store bounds
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// What to do when a limit is exceeded
    #[serde(default)]
    pub policy: PolicyKind,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            units: default_units(),
            windows: Vec::new(),
            tracker: TrackerConfig::default(),
            policy: PolicyKind::default(),
        }
    }
}

fn default_name() -> String {
    DEFAULT_THROTTLER_NAME.to_string()
}

fn default_units() -> String {
    DEFAULT_UNITS.to_string()
}

/// A single throttle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window identifier
    pub interval: ThrottleInterval,
    /// Units allowed per window
    pub limit: u32,
    /// Window length override in seconds (defaults to the interval's length)
    #[serde(default)]
    pub per_seconds: Option<f64>,
    /// Units label override
    #[serde(default)]
    pub units: Option<String>,
}

/// Tracker store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum number of tracked clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Idle time in seconds after which a client's state may be evicted
    /// Raised to the longest window when shorter.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Minimum seconds between idle sweeps of a full store
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_clients() -> usize {
    DEFAULT_MAX_CLIENTS
}

fn default_idle_ttl_secs() -> u64 {
    DEFAULT_IDLE_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

/// Built-in rejection policies selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Return a `TooManyRequests` error
    #[default]
    TooManyRequests,
    /// Reject silently
    Deny,
    /// Log a warning and reject
    Log,
    /// Never reject
    Allow,
}

impl PolicyKind {
    pub fn into_policy(self) -> Box<dyn RejectionPolicy> {
        match self {
            PolicyKind::TooManyRequests => Box::new(TooManyRequestsPolicy),
            PolicyKind::Deny => Box::new(DenyPolicy),
            PolicyKind::Log => Box::new(LoggingPolicy),
            PolicyKind::Allow => Box::new(AllowPolicy),
        }
    }
}

impl ThrottlerConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottlerError::Config(format!("Failed to parse throttle config: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file layered with
    /// `THROTTLER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading throttle configuration");
            let name = path.to_str().ok_or_else(|| {
                ThrottlerError::Config(format!("Non UTF-8 config path: {}", path.display()))
            })?;
            builder = builder.add_source(::config::File::new(name, ::config::FileFormat::Yaml));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ThrottlerError::Config(e.to_string()))
    }

    /// Build the definition set, validating every window.
    pub fn definitions(&self) -> Result<ThrottleDefinitionSet> {
        if self.windows.is_empty() {
            return Err(ThrottlerError::Config(
                "At least one throttle window must be configured".to_string(),
            ));
        }

        let mut definitions = ThrottleDefinitionSet::with_units(self.units.clone());
        for window in &self.windows {
            let definition = ThrottleLimitDefinition::new(
                window.limit,
                window
                    .per_seconds
                    .unwrap_or(window.interval.seconds() as f64),
                window.units.clone().unwrap_or_else(|| self.units.clone()),
            )?;
            definitions.insert_definition(window.interval, definition);
        }
        Ok(definitions)
    }

    pub fn tracker_settings(&self) -> Result<TrackerStoreSettings> {
        if self.tracker.max_clients == 0 {
            return Err(ThrottlerError::Config(
                "tracker.max_clients must be > 0".to_string(),
            ));
        }
        if self.tracker.idle_ttl_secs == 0 {
            return Err(ThrottlerError::Config(
                "tracker.idle_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.tracker.sweep_interval_secs == 0 {
            return Err(ThrottlerError::Config(
                "tracker.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(TrackerStoreSettings {
            max_clients: self.tracker.max_clients,
            idle_ttl: Duration::from_secs(self.tracker.idle_ttl_secs),
            sweep_interval: Duration::from_secs(self.tracker.sweep_interval_secs),
        })
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.definitions()?;
        self.tracker_settings()?;
        Ok(())
    }

    /// Build a throttler from this configuration.
    pub fn build_throttler(
        &self,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<TokenBucketThrottler> {
        TokenBucketThrottler::builder(self.definitions()?)
            .name(self.name.clone())
            .time_source(time_source)
            .tracker_settings(self.tracker_settings()?)
            .boxed_policy(self.policy.into_policy())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttling::{ManualTimeSource, Throttler};

    const API_CONFIG: &str = r#"
name: api
units: requests
windows:
  - interval: quarter_min
    limit: 15
  - interval: hour
    limit: 200
    units: calls
  - interval: day
    limit: 1000
    per_seconds: 43200
tracker:
  max_clients: 500
  idle_ttl_secs: 3600
policy: deny
"#;

    #[test]
    fn test_parse_config() {
        let config = ThrottlerConfig::from_yaml(API_CONFIG).unwrap();
        assert_eq!(config.name, "api");
        assert_eq!(config.windows.len(), 3);
        assert_eq!(config.policy, PolicyKind::Deny);
        assert_eq!(config.tracker.max_clients, 500);

        let definitions = config.definitions().unwrap();
        let order: Vec<ThrottleInterval> = definitions.throttle_limits().map(|(i, _)| i).collect();
        assert_eq!(
            order,
            vec![ThrottleInterval::QuarterMinute, ThrottleInterval::Hour, ThrottleInterval::Day]
        );

        let quarter = definitions.throttle_definition(ThrottleInterval::QuarterMinute).unwrap();
        assert_eq!(quarter.per(), 15.0);
        assert_eq!(quarter.units(), "requests");

        let hour = definitions.throttle_definition(ThrottleInterval::Hour).unwrap();
        assert_eq!(hour.units(), "calls");

        let day = definitions.throttle_definition(ThrottleInterval::Day).unwrap();
        assert_eq!(day.per(), 43200.0);
    }

    #[test]
    fn test_defaults() {
        let yaml = "windows:\n  - interval: minute\n    limit: 60\n";
        let config = ThrottlerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, DEFAULT_THROTTLER_NAME);
        assert_eq!(config.units, DEFAULT_UNITS);
        assert_eq!(config.policy, PolicyKind::TooManyRequests);
        assert_eq!(config.tracker.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(config.tracker.idle_ttl_secs, 86_400);
        assert_eq!(config.tracker.sweep_interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_windows() {
        assert!(ThrottlerConfig::default().validate().is_err());

        let zero_limit = "windows:\n  - interval: day\n    limit: 0\n";
        let config = ThrottlerConfig::from_yaml(zero_limit).unwrap();
        assert!(matches!(config.definitions(), Err(ThrottlerError::Config(_))));

        let zero_period = "windows:\n  - interval: day\n    limit: 5\n    per_seconds: 0\n";
        let config = ThrottlerConfig::from_yaml(zero_period).unwrap();
        assert!(config.definitions().is_err());

        let negative_limit = "windows:\n  - interval: day\n    limit: -1\n";
        assert!(ThrottlerConfig::from_yaml(negative_limit).is_err());

        let unknown_interval = "windows:\n  - interval: week\n    limit: 1\n";
        assert!(ThrottlerConfig::from_yaml(unknown_interval).is_err());
    }

    #[test]
    fn test_rejects_invalid_tracker_settings() {
        let yaml = "windows:\n  - interval: day\n    limit: 5\ntracker:\n  max_clients: 0\n";
        let config = ThrottlerConfig::from_yaml(yaml).unwrap();
        assert!(config.tracker_settings().is_err());

        let yaml = "windows:\n  - interval: day\n    limit: 5\ntracker:\n  idle_ttl_secs: 0\n";
        let config = ThrottlerConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml =
            "windows:\n  - interval: day\n    limit: 5\ntracker:\n  sweep_interval_secs: 0\n";
        let config = ThrottlerConfig::from_yaml(yaml).unwrap();
        assert!(config.tracker_settings().is_err());
    }

    #[test]
    fn test_build_throttler_uses_configured_policy() {
        let config = ThrottlerConfig::from_yaml(API_CONFIG).unwrap();
        let clock = ManualTimeSource::at_epoch();
        let throttler = config.build_throttler(Arc::new(clock)).unwrap();

        assert_eq!(throttler.name(), "api");
        for _ in 0..14 {
            assert!(throttler.proceed("client").unwrap());
        }
        assert!(!throttler.proceed("client").unwrap());
    }

    #[test]
    fn test_load_layers_environment_over_file() {
        let path = std::env::temp_dir()
            .join(format!("throttler-config-{}.yaml", std::process::id()));
        std::fs::write(&path, API_CONFIG).unwrap();
        std::env::set_var("THROTTLER__TRACKER__MAX_CLIENTS", "42");

        let config = ThrottlerConfig::load(Some(&path));
        std::env::remove_var("THROTTLER__TRACKER__MAX_CLIENTS");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.name, "api");
        assert_eq!(config.windows.len(), 3);
        assert_eq!(config.tracker.max_clients, 42);
        assert_eq!(config.tracker.idle_ttl_secs, 3600);
    }

    #[test]
    fn test_from_file_missing() {
        let result = ThrottlerConfig::from_file("/nonexistent/throttler.yaml");
        assert!(matches!(result, Err(ThrottlerError::Io(_))));
    }
}
