//! # Fritz!Box client configuration
//!
//! This crate provides configuration management for the TR-64 client crates:
//! - An embedded default configuration (`fritzbox.yaml`)
//! - Merging with an optional `config.yaml` found in the configuration directory
//! - Environment variable overrides (`FRITZBOX_CONFIG__SECTION__KEY=value`)
//! - Typed getters and setters for the discovery, SOAP and credential settings
//!
//! ## Usage
//!
//! ```no_run
//! use fritzconfig::get_config;
//!
//! let config = get_config();
//! let timeout = config.get_soap_request_timeout_ms()?;
//! let port = config.get_bind_port();
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("fritzbox.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_config("").unwrap_or_else(|err| {
        warn!("Failed to load configuration ({}), using embedded defaults", err);
        Config::from_defaults().unwrap_or_else(|_| Config::empty())
    }));
}

const ENV_CONFIG_DIR: &str = "FRITZBOX_CONFIG";
const ENV_PREFIX: &str = "FRITZBOX_CONFIG__";
const CONFIG_DIR_NAME: &str = ".fritzbox";
const CONFIG_FILE_NAME: &str = "config.yaml";

// Default values for configuration
pub const DEFAULT_BIND_PORT: u16 = 1901;
pub const DEFAULT_MAX_DUPLICATES: u64 = 5;
pub const DEFAULT_MAX_ITERATIONS: u64 = 10;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DESCRIPTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse::<u64>().unwrap_or($default)),
                Ok(_) | Err(_) => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                Ok(Value::Number(n)) => Ok(n.to_string()),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for the TR-64 client
///
/// Holds the merged YAML tree (defaults, file, environment). Setters persist
/// the tree back to `config.yaml` when the configuration was loaded from a
/// directory.
#[derive(Debug)]
pub struct Config {
    config_dir: Option<PathBuf>,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Loads the configuration from the specified directory
    ///
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with `config.yaml` if present
    /// 4. Applies environment variable overrides
    ///
    /// Nothing is written to disk; see [`Config::save`].
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);
        let mut config_value = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &lower_keys_value(external_value));
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        apply_env_overrides(&mut config_value, env::vars());

        Ok(Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(config_value),
        })
    }

    /// Configuration built only from the embedded defaults, never persisted.
    pub fn from_defaults() -> Result<Self> {
        let value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(lower_keys_value(value)),
        })
    }

    /// Configuration with no values at all; every getter returns its default.
    pub fn empty() -> Self {
        Config {
            config_dir: None,
            path: None,
            data: Mutex::new(Value::Mapping(Mapping::new())),
        }
    }

    /// Directory the configuration was loaded from, if any.
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Saves the current configuration to `config.yaml`
    ///
    /// The configuration directory is created when missing.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let yaml = {
            let data = self.lock()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("Configuration lock poisoned"))
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["soap", "request_timeout_ms"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        get_value_internal(&data, path)
    }

    /// Gets the local UDP port discovery sockets bind to
    pub fn get_bind_port(&self) -> u16 {
        match self.get_value(&["discovery", "bind_port"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_else(|| {
                    warn!("Invalid discovery port '{}', using default {}", n, DEFAULT_BIND_PORT);
                    DEFAULT_BIND_PORT
                }),
            Ok(Value::String(s)) => s.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!("Invalid discovery port '{}', using default {}", s, DEFAULT_BIND_PORT);
                DEFAULT_BIND_PORT
            }),
            _ => DEFAULT_BIND_PORT,
        }
    }

    pub fn set_bind_port(&self, port: u16) -> Result<()> {
        self.set_value(&["discovery", "bind_port"], Value::Number(Number::from(port)))
    }

    impl_u64_config!(
        get_max_duplicates,
        set_max_duplicates,
        &["discovery", "max_duplicates"],
        DEFAULT_MAX_DUPLICATES
    );

    impl_u64_config!(
        get_max_iterations,
        set_max_iterations,
        &["discovery", "max_iterations"],
        DEFAULT_MAX_ITERATIONS
    );

    impl_u64_config!(
        get_receive_timeout_ms,
        set_receive_timeout_ms,
        &["discovery", "receive_timeout_ms"],
        DEFAULT_RECEIVE_TIMEOUT_MS
    );

    impl_bool_config!(
        get_enable_ipv6,
        set_enable_ipv6,
        &["discovery", "enable_ipv6"],
        true
    );

    impl_u64_config!(
        get_soap_request_timeout_ms,
        set_soap_request_timeout_ms,
        &["soap", "request_timeout_ms"],
        DEFAULT_REQUEST_TIMEOUT_MS
    );

    impl_bool_config!(
        get_accept_invalid_certs,
        set_accept_invalid_certs,
        &["soap", "accept_invalid_certs"],
        true
    );

    impl_u64_config!(
        get_description_timeout_ms,
        set_description_timeout_ms,
        &["description", "timeout_ms"],
        DEFAULT_DESCRIPTION_TIMEOUT_MS
    );

    impl_string_config!(
        get_username,
        set_username,
        &["credentials", "username"],
        ""
    );

    impl_string_config!(
        get_password,
        set_password,
        &["credentials", "password"],
        ""
    );

    impl_string_config!(
        get_log_level,
        set_log_level,
        &["log", "level"],
        DEFAULT_LOG_LEVEL
    );

    /// Username and password when a username is configured.
    pub fn get_credentials(&self) -> Option<(String, String)> {
        let username = self.get_username().ok()?;
        if username.is_empty() {
            return None;
        }
        let password = self.get_password().unwrap_or_default();
        Some((username, password))
    }
}

/// Returns the process-wide configuration
///
/// Loaded once from the default lookup locations; falls back to the
/// embedded defaults when loading fails.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

/// Applies `FRITZBOX_CONFIG__A__B=value` style variables onto `config`
fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let yaml_value = convert_env_value(&value);
            if let Err(err) = set_value_internal(config, &key_path, yaml_value) {
                warn!("Ignoring environment override {}: {}", key, err);
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
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
