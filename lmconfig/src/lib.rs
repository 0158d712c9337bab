//! # LanMusic configuration
//!
//! This crate owns the configuration of the LanMusic server:
//! - an embedded default YAML document (`lanmusic.yaml`)
//! - merged with `<config_dir>/config.yaml` when present
//! - overridden by `LANMUSIC_CONFIG__SECTION__KEY=value` environment variables
//! - saved back to disk after every change
//!
//! ## Usage
//!
//! ```no_run
//! use lmconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let cache_dir = config.get_managed_dir(&["cache", "directory"], "cache")?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Other crates add their own typed accessors through extension traits
//! implemented on [`Config`] (see `lmcache::CacheConfigExt`,
//! `lmfetch::FetcherConfigExt`, ...), built on the generic getters below.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::info;

mod net;

pub use net::guess_local_ip;

const DEFAULT_CONFIG: &str = include_str!("lanmusic.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load LanMusic configuration"));
}

const ENV_CONFIG_DIR: &str = "LANMUSIC_CONFIG";
const ENV_PREFIX: &str = "LANMUSIC_CONFIG__";
const DEFAULT_DIR_NAME: &str = ".lanmusic";

const DEFAULT_HTTP_PORT: u16 = 1809;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Generates a getter/setter pair for a `usize` value with a default.
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            self.get_u64($path, $default as u64) as usize
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value as u64)))
        }
    };
}

/// Generates a getter/setter pair for a `bool` value with a default.
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            self.get_bool($path, $default)
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager.
///
/// The whole document is kept as a `serde_yaml::Value` behind a mutex;
/// every `set_*` call writes the document back to `config.yaml`.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Finds the configuration directory.
    ///
    /// Order: explicit argument, `LANMUSIC_CONFIG`, `./.lanmusic`,
    /// `~/.lanmusic`, then `./.lanmusic` as a fallback.
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Using config directory from env");
            return PathBuf::from(env_path);
        }

        let local = Path::new(DEFAULT_DIR_NAME);
        if local.exists() {
            return local.to_path_buf();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(DEFAULT_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        local.to_path_buf()
    }

    /// Creates the directory if needed and checks it is readable and writable.
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let probe = path.join(".write_test");
        fs::write(&probe, b"test")?;
        fs::remove_file(&probe)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Loads the configuration.
    ///
    /// 1. resolves and validates the configuration directory
    /// 2. parses the embedded defaults
    /// 3. merges `config.yaml` over them when the file exists
    /// 4. applies `LANMUSIC_CONFIG__*` environment overrides
    /// 5. saves the merged document
    ///
    /// An empty `directory` means "use the default lookup order".
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");
        let mut value = lower_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);

        // Les clés sont normalisées avant la fusion, sinon `Fetcher` et
        // `fetcher` ne se fusionnent pas.
        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external = lower_keys(serde_yaml::from_slice(&data)?);
                merge_yaml(&mut value, &external);
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
            }
        }

        apply_env_overrides(&mut value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(value),
        };
        config.save()?;
        Ok(config)
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        // A poisoned document is still a valid YAML value.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes the current document to `config.yaml`.
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Returns the configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Sets a value (e.g. `&["cache", "max_entries"]`) and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Reads a value; errors when the path does not exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        get_value_internal(&data, path)
    }

    /// Reads an unsigned integer, falling back to `default` when absent or invalid.
    pub fn get_u64(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            _ => default,
        }
    }

    /// Reads a string, falling back to `default` when absent or not a string.
    pub fn get_string(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    /// Reads a list of scalars as strings (non-scalar items are skipped).
    pub fn get_string_list(&self, path: &[&str]) -> Vec<String> {
        match self.get_value(path) {
            Ok(Value::Sequence(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Resolves a path against the configuration directory (absolute paths are kept).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config_dir.join(p)
        }
    }

    /// Returns a directory managed by the configuration, creating it if needed.
    ///
    /// The stored value may be absolute or relative to the configuration
    /// directory. When the key is missing, `default` is stored and used.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };

        let absolute = self.resolve_path(&dir);
        if !absolute.exists() {
            fs::create_dir_all(&absolute)?;
            info!(directory = %absolute.display(), "Created managed directory");
        }
        Ok(absolute)
    }

    /// Base URL advertised to LAN clients; guesses the local IP when unset.
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => guess_local_ip(),
        }
    }

    pub fn get_http_port(&self) -> u16 {
        let port = self.get_u64(&["host", "http_port"], DEFAULT_HTTP_PORT as u64);
        match u16::try_from(port) {
            Ok(p) if p != 0 => p,
            _ => {
                tracing::warn!(port, "Invalid HTTP port, using default {}", DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    pub fn get_log_min_level(&self) -> String {
        self.get_string(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL)
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration, loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    match data {
        Value::Mapping(map) => {
            let key = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key, value);
                Ok(())
            } else {
                let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
                if !entry.is_mapping() {
                    *entry = Value::Mapping(Mapping::new());
                }
                set_value_internal(entry, &path[1..], value)
            }
        }
        _ => Err(anyhow!("Current node is not a mapping")),
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        match current {
            Value::Mapping(map) => match map.get(Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            },
            _ => return Err(anyhow!("Path {} is not a mapping", path[..i].join("."))),
        }
    }
    Ok(current.clone())
}

fn apply_env_overrides(config: &mut Value) {
    for (key, value) in env::vars() {
        if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
            let path: Vec<&str> = rest.split("__").collect();
            let parsed = serde_yaml::from_str::<Value>(&value)
                .unwrap_or_else(|_| Value::String(value.clone()));
            if let Err(e) = set_value_internal(config, &path, parsed) {
                tracing::warn!(env_var = %key, "Ignoring config override: {}", e);
            }
        }
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut lowered = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                lowered.insert(k, lower_keys(v));
            }
            Value::Mapping(lowered)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Recursively merges `external` into `default`.
///
/// Mappings are merged key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_in(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_are_loaded_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        assert_eq!(config.get_http_port(), 1809);
        assert_eq!(config.get_u64(&["acquire", "max_concurrent_fetches"], 0), 3);
        assert_eq!(config.get_string(&["fetcher", "program"], ""), "yt-dlp");
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_external_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Fetcher:\n  Timeout_Secs: 12\n  extra_args: [\"--cookies\", \"c.txt\"]\n",
        )
        .unwrap();

        let config = load_in(&dir);
        assert_eq!(config.get_u64(&["fetcher", "timeout_secs"], 0), 12);
        assert_eq!(config.get_string(&["fetcher", "audio_format"], ""), "mp3");
        assert_eq!(
            config.get_string_list(&["fetcher", "extra_args"]),
            vec!["--cookies".to_string(), "c.txt".to_string()]
        );
    }

    #[test]
    fn test_mixed_case_nested_keys_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Host:\n  Logger:\n    Min_Level: DEBUG\nCACHE:\n  Max_Entries: 5\n",
        )
        .unwrap();

        let config = load_in(&dir);
        assert_eq!(config.get_string(&["host", "logger", "min_level"], ""), "DEBUG");
        assert_eq!(config.get_u64(&["host", "logger", "buffer_capacity"], 0), 1000);
        assert_eq!(config.get_u64(&["host", "http_port"], 0), 1809);
        assert_eq!(config.get_u64(&["cache", "max_entries"], 0), 5);
        assert_eq!(config.get_string(&["cache", "directory"], ""), "cache");
    }

    #[test]
    fn test_set_value_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let config = load_in(&dir);
            config.set_http_port(9090).unwrap();
            config
                .set_value(&["library", "new", "key"], Value::Bool(true))
                .unwrap();
        }
        let reloaded = load_in(&dir);
        assert_eq!(reloaded.get_http_port(), 9090);
        assert!(reloaded.get_bool(&["library", "new", "key"], false));
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        let cache = config.get_managed_dir(&["cache", "directory"], "cache").unwrap();
        assert_eq!(cache, dir.path().join("cache"));
        assert!(cache.is_dir());
    }

    #[test]
    fn test_missing_path_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        assert!(config.get_value(&["nope", "nothing"]).is_err());
        assert_eq!(config.get_u64(&["nope"], 7), 7);
        assert!(config.get_string_list(&["nope"]).is_empty());
    }

    #[test]
    fn test_merge_yaml_replaces_scalars() {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: 2}\nd: [1]").unwrap();
        let ext: Value = serde_yaml::from_str("a: {b: 5}\nd: [2, 3]").unwrap();
        merge_yaml(&mut base, &ext);

        assert_eq!(get_value_internal(&base, &["a", "b"]).unwrap(), Value::from(5));
        assert_eq!(get_value_internal(&base, &["a", "c"]).unwrap(), Value::from(2));
        assert_eq!(
            get_value_internal(&base, &["d"]).unwrap(),
            serde_yaml::from_str::<Value>("[2, 3]").unwrap()
        );
    }
}
