//! Engine configuration
//!
//! Every knob of the prefetch pipeline is data: cache sizes, tier radii,
//! stagger delays, dwell and progressive batch sizes. Configuration can be
//! loaded from a JSON file, from environment variables, or built in code, and
//! it can be swapped at runtime through [`SharedConfig`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

/// Configuration for the prefetch and decode cache engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum decoded bitmaps kept in the bitmap cache
    pub cache_capacity: usize,
    /// Maximum resolved byte sources kept in the URL/blob pool
    pub pool_capacity: usize,
    /// Upper bound on the total bytes kept in the URL/blob pool
    pub pool_max_bytes: usize,
    /// Concurrent fetches per pool preload batch
    pub pool_batch_size: usize,
    /// HIGH tier covers focus ±1..=high_radius
    pub high_radius: usize,
    /// NORMAL tier covers up to ±normal_radius
    pub normal_radius: usize,
    /// LOW tier covers up to ±low_radius
    pub low_radius: usize,
    /// Delay before HIGH tier is scheduled
    pub high_delay_ms: u64,
    /// Delay before NORMAL tier is scheduled
    pub normal_delay_ms: u64,
    /// Delay before LOW tier is scheduled
    pub low_delay_ms: u64,
    /// Whether the idle loader runs at all
    pub progressive_enabled: bool,
    /// Dwell time before the idle loader starts
    pub dwell_ms: u64,
    /// Items loaded per progressive batch
    pub progressive_batch_size: usize,
    /// Cap on progressively loaded items; `None` loads all remaining
    pub progressive_max_pages: Option<usize>,
    /// Settle window for visible-range changes
    pub visibility_debounce_ms: u64,
    /// Neighbors outside the visible range requested at normal priority
    pub thumbnail_margin: usize,
    /// How long a request waits for the decode backend to come up
    pub readiness_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10,
            pool_capacity: 64,
            pool_max_bytes: 256 * 1024 * 1024,
            pool_batch_size: 4,
            high_radius: 1,
            normal_radius: 3,
            low_radius: 5,
            high_delay_ms: 30,
            normal_delay_ms: 150,
            low_delay_ms: 300,
            progressive_enabled: true,
            dwell_ms: 3000,
            progressive_batch_size: 5,
            progressive_max_pages: Some(50),
            visibility_debounce_ms: 40,
            thumbnail_margin: 0,
            readiness_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Sets the bitmap cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the HIGH/NORMAL/LOW tier radii.
    pub fn with_radii(mut self, high: usize, normal: usize, low: usize) -> Self {
        self.high_radius = high;
        self.normal_radius = normal;
        self.low_radius = low;
        self
    }

    /// Sets the HIGH/NORMAL/LOW stagger delays in milliseconds.
    pub fn with_delays_ms(mut self, high: u64, normal: u64, low: u64) -> Self {
        self.high_delay_ms = high;
        self.normal_delay_ms = normal;
        self.low_delay_ms = low;
        self
    }

    /// Sets the dwell time and progressive batching.
    pub fn with_progressive(
        mut self,
        dwell_ms: u64,
        batch_size: usize,
        max_pages: Option<usize>,
    ) -> Self {
        self.dwell_ms = dwell_ms;
        self.progressive_batch_size = batch_size;
        self.progressive_max_pages = max_pages;
        self
    }

    pub fn high_delay(&self) -> Duration {
        Duration::from_millis(self.high_delay_ms)
    }

    pub fn normal_delay(&self) -> Duration {
        Duration::from_millis(self.normal_delay_ms)
    }

    pub fn low_delay(&self) -> Duration {
        Duration::from_millis(self.low_delay_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn visibility_debounce(&self) -> Duration {
        Duration::from_millis(self.visibility_debounce_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns the offending key when a capacity or batch size is zero, or
    /// when the tier radii are not ordered `high <= normal <= low`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("cacheCapacity", self.cache_capacity),
            ("poolCapacity", self.pool_capacity),
            ("poolMaxBytes", self.pool_max_bytes),
            ("poolBatchSize", self.pool_batch_size),
            ("progressiveBatchSize", self.progressive_batch_size),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue(key.to_string()));
            }
        }

        if self.high_radius > self.normal_radius {
            return Err(ConfigError::InvalidValue("highRadius".to_string()));
        }
        if self.normal_radius > self.low_radius {
            return Err(ConfigError::InvalidValue("normalRadius".to_string()));
        }
        Ok(())
    }

    /// Returns the default configuration file for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/pageflow/prefetch.json
    /// - Linux: ~/.config/pageflow/prefetch.json
    /// - Windows: %APPDATA%\pageflow\prefetch.json
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("pageflow").join("prefetch.json")
        } else {
            PathBuf::from("pageflow-prefetch.json")
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `PAGEFLOW_CACHE_CAPACITY`: bitmap cache entries (default: 10)
    /// - `PAGEFLOW_POOL_CAPACITY`: pooled byte sources (default: 64)
    /// - `PAGEFLOW_POOL_MAX_BYTES`: total pooled bytes (default: 256 MiB)
    /// - `PAGEFLOW_TIER_RADII`: `high,normal,low` (default: `1,3,5`)
    /// - `PAGEFLOW_TIER_DELAYS_MS`: `high,normal,low` (default: `30,150,300`)
    /// - `PAGEFLOW_DWELL_MS`: idle dwell before progressive loading (default: 3000)
    /// - `PAGEFLOW_PROGRESSIVE_BATCH`: items per progressive batch (default: 5)
    /// - `PAGEFLOW_PROGRESSIVE_MAX`: item cap, or `all` (default: 50)
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value, or if the
    /// result does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PAGEFLOW_CACHE_CAPACITY") {
            config.cache_capacity = parse_number("PAGEFLOW_CACHE_CAPACITY", &val)?;
        }

        if let Ok(val) = std::env::var("PAGEFLOW_POOL_CAPACITY") {
            config.pool_capacity = parse_number("PAGEFLOW_POOL_CAPACITY", &val)?;
        }

        if let Ok(val) = std::env::var("PAGEFLOW_POOL_MAX_BYTES") {
            config.pool_max_bytes = parse_number("PAGEFLOW_POOL_MAX_BYTES", &val)?;
        }

        if let Ok(val) = std::env::var("PAGEFLOW_TIER_RADII") {
            let [high, normal, low] = parse_triple("PAGEFLOW_TIER_RADII", &val)?;
            config = config.with_radii(high as usize, normal as usize, low as usize);
        }

        if let Ok(val) = std::env::var("PAGEFLOW_TIER_DELAYS_MS") {
            let [high, normal, low] = parse_triple("PAGEFLOW_TIER_DELAYS_MS", &val)?;
            config = config.with_delays_ms(high, normal, low);
        }

        if let Ok(val) = std::env::var("PAGEFLOW_DWELL_MS") {
            config.dwell_ms = parse_number("PAGEFLOW_DWELL_MS", &val)?;
        }

        if let Ok(val) = std::env::var("PAGEFLOW_PROGRESSIVE_BATCH") {
            config.progressive_batch_size = parse_number("PAGEFLOW_PROGRESSIVE_BATCH", &val)?;
        }

        if let Ok(val) = std::env::var("PAGEFLOW_PROGRESSIVE_MAX") {
            config.progressive_max_pages = if val.trim().eq_ignore_ascii_case("all") {
                None
            } else {
                Some(parse_number("PAGEFLOW_PROGRESSIVE_MAX", &val)?)
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a JSON file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_triple(key: &str, value: &str) -> Result<[u64; 3], ConfigError> {
    let parts = value
        .split(',')
        .map(|part| parse_number::<u64>(key, part))
        .collect::<Result<Vec<_>, _>>()?;
    <[u64; 3]>::try_from(parts).map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Runtime-adjustable configuration shared by every component
///
/// Readers take a snapshot; writers replace the whole configuration after it
/// validates. The revision counter lets components notice updates.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<EngineConfig>>,
    revision: Arc<AtomicU64>,
}

impl SharedConfig {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A copy of the current configuration
    pub fn snapshot(&self) -> EngineConfig {
        self.inner.read().clone()
    }

    /// Number of successful updates so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Apply `edit` to a copy and install it if it validates
    ///
    /// The write lock is held from the copy to the install, so concurrent
    /// updates are serialized and none is lost. `edit` must not read this
    /// configuration.
    ///
    /// # Errors
    /// Leaves the current configuration untouched when validation fails.
    pub fn update(&self, edit: impl FnOnce(&mut EngineConfig)) -> Result<EngineConfig, ConfigError> {
        let mut current = self.inner.write();
        let mut next = current.clone();
        edit(&mut next);
        next.validate()?;

        *current = next.clone();
        self.revision.fetch_add(1, Ordering::AcqRel);
        Ok(next)
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed configuration file
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_KEYS: &[&str] = &[
        "PAGEFLOW_CACHE_CAPACITY",
        "PAGEFLOW_POOL_CAPACITY",
        "PAGEFLOW_POOL_MAX_BYTES",
        "PAGEFLOW_TIER_RADII",
        "PAGEFLOW_TIER_DELAYS_MS",
        "PAGEFLOW_DWELL_MS",
        "PAGEFLOW_PROGRESSIVE_BATCH",
        "PAGEFLOW_PROGRESSIVE_MAX",
    ];

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.pool_batch_size, 4);
        assert_eq!(
            (config.high_radius, config.normal_radius, config.low_radius),
            (1, 3, 5)
        );
        assert_eq!(config.dwell(), Duration::from_secs(3));
        assert_eq!(config.progressive_max_pages, Some(50));
        assert_eq!(config.readiness_timeout(), Duration::from_millis(2000));
        assert_eq!(config.pool_max_bytes, 256 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::default()
            .with_cache_capacity(4)
            .with_radii(2, 4, 8)
            .with_delays_ms(10, 20, 40)
            .with_progressive(1000, 3, None);

        assert_eq!(config.cache_capacity, 4);
        assert_eq!(config.normal_radius, 4);
        assert_eq!(config.low_delay(), Duration::from_millis(40));
        assert_eq!(config.progressive_batch_size, 3);
        assert_eq!(config.progressive_max_pages, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_cache = EngineConfig::default().with_cache_capacity(0);
        assert!(matches!(
            zero_cache.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "cacheCapacity"
        ));

        let mut no_pool_bytes = EngineConfig::default();
        no_pool_bytes.pool_max_bytes = 0;
        assert!(matches!(
            no_pool_bytes.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "poolMaxBytes"
        ));

        let unordered = EngineConfig::default().with_radii(4, 3, 5);
        assert!(unordered.validate().is_err());
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "cacheCapacity": 6, "lowRadius": 9 }"#).unwrap();
        assert_eq!(config.cache_capacity, 6);
        assert_eq!(config.low_radius, 9);
        assert_eq!(config.high_radius, 1);
    }

    #[test]
    fn test_json_pool_max_bytes() {
        let config = EngineConfig::from_json(r#"{ "poolMaxBytes": 4096 }"#).unwrap();
        assert_eq!(config.pool_max_bytes, 4096);
        assert_eq!(serde_json::to_value(&config).unwrap()["poolMaxBytes"], 4096);
    }

    #[test]
    fn test_json_null_max_pages_means_all() {
        let config = EngineConfig::from_json(r#"{ "progressiveMaxPages": null }"#).unwrap();
        assert_eq!(config.progressive_max_pages, None);
    }

    #[test]
    fn test_json_invalid() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{ "poolBatchSize": 0 }"#),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefetch.json");

        let config = EngineConfig::default()
            .with_radii(2, 4, 6)
            .with_progressive(500, 2, Some(20));
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = EngineConfig::default_config_path();
        assert!(path.ends_with("prefetch.json"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(ENV_KEYS);
        for key in ENV_KEYS {
            env::remove_var(key);
        }

        env::set_var("PAGEFLOW_CACHE_CAPACITY", "12");
        env::set_var("PAGEFLOW_TIER_RADII", "2, 4, 6");
        env::set_var("PAGEFLOW_TIER_DELAYS_MS", "10,100,200");
        env::set_var("PAGEFLOW_PROGRESSIVE_MAX", "all");
        env::set_var("PAGEFLOW_POOL_MAX_BYTES", "1048576");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.pool_max_bytes, 1024 * 1024);
        assert_eq!(config.cache_capacity, 12);
        assert_eq!(
            (config.high_radius, config.normal_radius, config.low_radius),
            (2, 4, 6)
        );
        assert_eq!(config.normal_delay(), Duration::from_millis(100));
        assert_eq!(config.progressive_max_pages, None);
        assert_eq!(config.dwell_ms, 3000);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(ENV_KEYS);
        for key in ENV_KEYS {
            env::remove_var(key);
        }

        env::set_var("PAGEFLOW_TIER_RADII", "1,2");
        assert!(EngineConfig::from_env().is_err());

        env::set_var("PAGEFLOW_TIER_RADII", "1,3,5");
        env::set_var("PAGEFLOW_DWELL_MS", "soon");
        assert!(EngineConfig::from_env().is_err());
    }

    #[test]
    fn test_shared_config_update() {
        let shared = SharedConfig::default();
        assert_eq!(shared.revision(), 0);

        shared.update(|c| c.cache_capacity = 3).unwrap();
        assert_eq!(shared.snapshot().cache_capacity, 3);
        assert_eq!(shared.revision(), 1);

        let rejected = shared.update(|c| c.cache_capacity = 0);
        assert!(rejected.is_err());
        assert_eq!(shared.snapshot().cache_capacity, 3);
        assert_eq!(shared.revision(), 1);
    }

    #[test]
    fn test_shared_config_concurrent_updates_not_lost() {
        let shared = SharedConfig::new(EngineConfig::default().with_progressive(0, 5, Some(50)));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        shared.update(|c| c.dwell_ms += 1).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(shared.snapshot().dwell_ms, 2000);
        assert_eq!(shared.revision(), 2000);
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
