//! # PMODlna Configuration Module
//!
//! This module provides configuration management for PMODlna, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let port = config.get_http_port();
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Les valeurs passées en ligne de commande sont appliquées en mémoire avec
//! les setters ; le fichier `config.yaml` n'est jamais réécrit.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use pmoutils::guess_local_ip;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmodlna.yaml");

const ENV_CONFIG_DIR: &str = "PMODLNA_CONFIG";
const ENV_PREFIX: &str = "PMODLNA_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmodlna";

// Default values for configuration
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_SEARCH_TIMEOUT_SECS: usize = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: usize = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: usize = 5;
const DEFAULT_CAPTURE_COMMAND: &str = "parec";

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string lists
///
/// Accepte une séquence YAML ou une chaîne séparée par des virgules
/// (forme naturelle d'une variable d'environnement).
macro_rules! impl_list_config {
    ($getter:ident, $setter:ident, $path:expr) => {
        pub fn $getter(&self) -> Vec<String> {
            match self.get_value($path) {
                Ok(value) => value_to_list(&value),
                Err(_) => Vec::new(),
            }
        }

        pub fn $setter(&self, values: Vec<String>) -> Result<()> {
            let seq = values.into_iter().map(Value::String).collect();
            self.set_value($path, Value::Sequence(seq))
        }
    };
}

/// Configuration manager for PMODlna
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::Config;
///
/// let config = Config::load_config("").unwrap();
/// println!("HTTP port: {}", config.get_http_port());
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Loads the configuration
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMODLNA_CONFIG` environment variable
    /// 3. `.pmodlna` in the current directory
    /// 4. `.pmodlna` in the user's home directory
    ///
    /// A missing directory or `config.yaml` is not an error: the embedded
    /// defaults are used. Environment variables prefixed with
    /// `PMODLNA_CONFIG__` are applied last.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        info!(config_dir=%config_dir, "Using config directory");

        let config_file: PathBuf = Path::new(&config_dir).join("config.yaml");
        let external = match fs::read_to_string(&config_file) {
            Ok(data) => {
                info!(config_file=%config_file.display(), "Loaded config file");
                Some(data)
            }
            Err(_) => {
                info!(config_file=%config_file.display(), "Config file not found, using default embedded config");
                None
            }
        };

        let mut config = Self::from_sources(external.as_deref(), env::vars())?;
        config.config_dir = config_dir;
        config.path = config_file.to_string_lossy().to_string();
        Ok(config)
    }

    /// Builds a configuration from an optional YAML document and a set of
    /// environment variables.
    ///
    /// Seules les variables commençant par `PMODLNA_CONFIG__` sont prises en
    /// compte ; `__` sépare les niveaux (`PMODLNA_CONFIG__HOST__HTTP_PORT`).
    pub fn from_sources<I>(external: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(yaml) = external {
            let external_value: Value = serde_yaml::from_str(yaml)?;
            // Un fichier vide se lit comme Null
            if !external_value.is_null() {
                merge_yaml(&mut config_value, &Self::lower_keys_value(external_value));
            }
        }

        Self::apply_env_overrides(&mut config_value, vars);

        Ok(Config {
            config_dir: String::new(),
            path: String::new(),
            data: Mutex::new(config_value),
        })
    }

    /// Directory the configuration was looked up in
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Path of the `config.yaml` file backing this configuration
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sets a configuration value at the specified path (in memory only)
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().map_err(|_| anyhow!("Config lock poisoned"))?;
        Self::set_value_internal(&mut data, path, value)
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
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().map_err(|_| anyhow!("Config lock poisoned"))?;
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides<I>(config: &mut Value, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let lowered = stripped.to_lowercase();
                let key_path = lowered.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(e) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(variable=%key, "Ignoring environment override: {}", e);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Host (IP ou nom) annoncé aux renderers dans les URLs de stream.
    ///
    /// Sans valeur configurée, l'adresse IPv4 de sortie est devinée ;
    /// retourne `None` si elle ne peut pas l'être.
    pub fn get_bind_host(&self) -> Option<String> {
        match self.get_value(&["host", "bind_host"]) {
            Ok(Value::String(s)) if !s.is_empty() => Some(s),
            _ => guess_local_ip().map(|ip| ip.to_string()),
        }
    }

    pub fn set_bind_host(&self, host: String) -> Result<()> {
        self.set_value(&["host", "bind_host"], Value::String(host))
    }

    /// Gets the HTTP port of the stream server
    ///
    /// Returns the default port (8080) if not configured or invalid.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    warn!("Invalid HTTP port {}, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => match s.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            _ => DEFAULT_HTTP_PORT,
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    /// Suffixe de l'encodeur imposé, `None` pour les laisser tous disponibles
    pub fn get_encoder(&self) -> Option<String> {
        match self.get_value(&["bridge", "encoder"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_lowercase()),
            _ => None,
        }
    }

    pub fn set_encoder(&self, suffix: String) -> Result<()> {
        self.set_value(&["bridge", "encoder"], Value::String(suffix))
    }

    /// Débit imposé en kbit/s ; `0` ou absence signifie le débit par défaut
    pub fn get_bit_rate(&self) -> Option<u32> {
        match self.get_value(&["bridge", "bit_rate"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0),
            Ok(Value::String(s)) => s.trim().parse::<u32>().ok().filter(|v| *v > 0),
            _ => None,
        }
    }

    pub fn set_bit_rate(&self, bit_rate: u32) -> Result<()> {
        self.set_value(&["bridge", "bit_rate"], Value::Number(Number::from(bit_rate)))
    }

    impl_list_config!(get_device_filter, set_device_filter, &["bridge", "device_filter"]);
    impl_list_config!(get_sink_filter, set_sink_filter, &["bridge", "sink_filter"]);
    impl_list_config!(get_renderer_urls, set_renderer_urls, &["bridge", "renderer_urls"]);

    impl_usize_config!(
        get_search_timeout_secs,
        set_search_timeout_secs,
        &["discovery", "search_timeout_secs"],
        DEFAULT_SEARCH_TIMEOUT_SECS
    );
    impl_usize_config!(
        get_http_timeout_secs,
        set_http_timeout_secs,
        &["discovery", "http_timeout_secs"],
        DEFAULT_HTTP_TIMEOUT_SECS
    );
    impl_usize_config!(
        get_shutdown_grace_secs,
        set_shutdown_grace_secs,
        &["shutdown", "grace_secs"],
        DEFAULT_SHUTDOWN_GRACE_SECS
    );

    /// Commande de capture audio (lecture du moniteur d'un sink)
    pub fn get_capture_command(&self) -> String {
        match self.get_value(&["capture", "command"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_CAPTURE_COMMAND.to_string(),
        }
    }

    impl_usize_config!(
        get_log_buffer_capacity,
        set_log_buffer_capacity,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );
    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Niveau de log minimum (TRACE, DEBUG, INFO, WARN, ERROR)
    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

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
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
