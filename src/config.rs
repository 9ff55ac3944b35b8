use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::proxy::selector::SelectionPolicy;

/// Environment variable naming an optional YAML config file.
pub const CONFIG_PATH_VAR: &str = "DNSFWD_CONFIG";

/// Runtime configuration.
///
/// Defaults reproduce the fixed setup of the forwarder: listen on port 8080,
/// resolve `app`, forward to port 8080 of the first resolved address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: String,
    pub backend_name: String,
    pub backend_port: u16,
    pub selection: SelectionPolicy,
    pub resolve_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            backend_name: "app".to_string(),
            backend_port: 8080,
            selection: SelectionPolicy::First,
            resolve_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            response_timeout_ms: 30_000,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads the config from `DNSFWD_CONFIG` (if set) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config file {path}"))
    }

    /// Parses YAML; keys that are left out keep their defaults.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LISTEN") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("BACKEND_NAME") {
            self.backend_name = v;
        }
        if let Some(v) = parse_var(lookup, "BACKEND_PORT")? {
            self.backend_port = v;
        }
        if let Some(v) = parse_var(lookup, "SELECTION")? {
            self.selection = v;
        }
        if let Some(v) = parse_var(lookup, "RESOLVE_TIMEOUT_MS")? {
            self.resolve_timeout_ms = v;
        }
        if let Some(v) = parse_var(lookup, "CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = parse_var(lookup, "RESPONSE_TIMEOUT_MS")? {
            self.response_timeout_ms = v;
        }
        if let Some(v) = parse_var(lookup, "MAX_HEADER_BYTES")? {
            self.max_header_bytes = v;
        }
        if let Some(v) = parse_var(lookup, "MAX_BODY_BYTES")? {
            self.max_body_bytes = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend_name.trim().is_empty() {
            bail!("backend_name must not be empty");
        }
        if self.backend_port == 0 {
            bail!("backend_port must be non-zero");
        }
        if self.resolve_timeout_ms == 0 {
            bail!("resolve_timeout_ms must be non-zero");
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be non-zero");
        }
        if self.response_timeout_ms == 0 {
            bail!("response_timeout_ms must be non-zero");
        }
        if self.max_header_bytes < 1024 {
            bail!("max_header_bytes must be at least 1024");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be non-zero");
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value {raw:?} for {key}: {e}")),
        None => Ok(None),
    }
}
