//! Configuration for mail dispatch.
//!
//! Provides:
//! - Retry policy and dispatcher settings (serde, human-readable durations)
//! - Message defaults used to pre-populate a [`MessageBuilder`](crate::types::MessageBuilder)
//! - The [`ConfigSource`] collaborator with in-memory, JSON and environment implementations

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Credentials;

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Default number of attempts for retrying dispatch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Default cap on the wait between attempts when backoff grows it.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Configuration lookup and conversion failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The key is not present in the source.
    #[error("Configuration key '{key}' not found")]
    NotFound {
        /// Requested key.
        key: String,
    },

    /// The value exists but could not be converted.
    #[error("Cannot convert '{value}' for key '{key}' to {target}: {reason}")]
    Conversion {
        /// Requested key.
        key: String,
        /// Raw value found.
        value: String,
        /// Target type name.
        target: &'static str,
        /// Conversion failure description.
        reason: String,
    },

    /// Reading a configuration file failed.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration is well-formed but not acceptable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns true if the error means the key is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::NotFound { .. })
    }
}

/// Retry policy for a dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before the second attempt.
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,
    /// Growth factor applied to the wait after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for the wait between attempts.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Add up to 30% random jitter to each wait.
    #[serde(default)]
    pub jitter: bool,
    /// Deadline for a single attempt; expiry counts as a transport failure.
    #[serde(default, with = "humantime_serde::option")]
    pub attempt_timeout: Option<Duration>,
}

fn default_max_attempts() -> u32 { DEFAULT_MAX_ATTEMPTS }
fn default_delay() -> Duration { DEFAULT_RETRY_DELAY }
fn default_multiplier() -> f64 { 1.0 }
fn default_max_delay() -> Duration { DEFAULT_MAX_RETRY_DELAY }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Default::default()
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the wait between attempts.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enables exponential backoff with the given multiplier and cap.
    pub fn backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    /// Enables or disables jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets a per-attempt deadline.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid("multiplier must be a finite value >= 1.0".into()));
        }
        if matches!(self.attempt_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::Invalid("attempt_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum batch members transmitting at once; unbounded when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Policy used by the `*_with_default_retry` helpers.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl DispatchConfig {
    /// Parses dispatcher settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DispatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid("max_concurrency must be positive".into()));
        }
        self.retry.validate()
    }
}

/// Default transport and sender settings applied to new messages.
#[derive(Debug, Clone)]
pub struct MailDefaults {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Negotiate an encrypted connection.
    pub use_encryption: bool,
    /// SMTP credentials.
    pub credentials: Option<Credentials>,
    /// Sender address.
    pub from: String,
}

impl Default for MailDefaults {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            use_encryption: false,
            credentials: None,
            from: String::new(),
        }
    }
}

impl MailDefaults {
    /// Configuration key for the SMTP host.
    pub const KEY_HOST: &'static str = "SmtpHost";
    /// Configuration key for the SMTP port.
    pub const KEY_PORT: &'static str = "SmtpPort";
    /// Configuration key for the encryption flag.
    pub const KEY_ENABLE_SSL: &'static str = "EnableSsl";
    /// Configuration key for the SMTP username.
    pub const KEY_USERNAME: &'static str = "Username";
    /// Configuration key for the SMTP password.
    pub const KEY_PASSWORD: &'static str = "Password";
    /// Configuration key for the sender address.
    pub const KEY_FROM: &'static str = "FromEmail";

    /// Loads defaults from a configuration source.
    ///
    /// Absent keys keep the built-in defaults; present but unconvertible
    /// values are errors. Credentials are set only when a non-empty username
    /// is present.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let mut defaults = Self::default();

        if let Some(host) = optional(source.get_string(Self::KEY_HOST))? {
            defaults.host = host;
        }
        if let Some(port) = optional(source.get_typed::<u16>(Self::KEY_PORT))? {
            defaults.port = port;
        }
        if let Some(ssl) = optional(source.get_flag(Self::KEY_ENABLE_SSL))? {
            defaults.use_encryption = ssl;
        }
        if let Some(from) = optional(source.get_string(Self::KEY_FROM))? {
            defaults.from = from;
        }
        let username = optional(source.get_string(Self::KEY_USERNAME))?;
        if let Some(username) = username.filter(|name| !name.is_empty()) {
            let password = optional(source.get_string(Self::KEY_PASSWORD))?.unwrap_or_default();
            defaults.credentials = Some(Credentials::new(username, password));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            host = %defaults.host,
            port = defaults.port,
            use_encryption = defaults.use_encryption,
            "Loaded mail defaults"
        );

        Ok(defaults)
    }
}

fn optional<T>(result: Result<T, ConfigError>) -> Result<Option<T>, ConfigError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Key/value configuration collaborator.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Returns the raw string stored under `key`.
    fn get_string(&self, key: &str) -> Result<String, ConfigError>;
}

/// Typed lookups available on every [`ConfigSource`].
pub trait ConfigSourceExt: ConfigSource {
    /// Returns the value under `key` converted to `T`.
    fn get_typed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.get_string(key)?;
        value.trim().parse::<T>().map_err(|e| ConfigError::Conversion {
            key: key.to_string(),
            value: value.clone(),
            target: std::any::type_name::<T>(),
            reason: e.to_string(),
        })
    }

    /// Returns a boolean flag; accepts `true/false`, `yes/no`, `on/off`, `1/0` in any case.
    fn get_flag(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.get_string(key)?;
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::Conversion {
                key: key.to_string(),
                value,
                target: "bool",
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    /// Returns a duration written in humantime form (e.g. `3s`, `500ms`).
    fn get_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        let value = self.get_string(key)?;
        humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Conversion {
            key: key.to_string(),
            value: value.clone(),
            target: "Duration",
            reason: e.to_string(),
        })
    }

    /// Returns the converted value, or `default` when it is missing or unconvertible.
    fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Debug,
        T::Err: fmt::Display,
    {
        match self.get_typed::<T>(key) {
            Ok(value) => value,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = key, error = %_e, default = ?default, "Keeping default setting");
                default
            }
        }
    }
}

impl<S: ConfigSource + ?Sized> ConfigSourceExt for S {}

/// In-memory configuration source.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    values: HashMap<String, String>,
}

impl MemoryConfigSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Inserts or replaces a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryConfigSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound { key: key.to_string() })
    }
}

/// Configuration loaded once from a flat JSON object.
///
/// String values are kept verbatim; numbers and booleans are stored in their
/// JSON text form. `null` entries are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct JsonConfigSource {
    inner: MemoryConfigSource,
}

impl JsonConfigSource {
    /// Loads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut inner = MemoryConfigSource::new();

        for (key, value) in document {
            let text = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(ConfigError::Invalid(format!(
                        "key '{}' must hold a scalar value",
                        key
                    )));
                }
            };
            inner.set(key, text);
        }

        Ok(Self { inner })
    }
}

impl ConfigSource for JsonConfigSource {
    fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        self.inner.get_string(key)
    }
}

/// Configuration read from environment variables.
///
/// Keys are converted to upper snake case and prefixed, so `SmtpHost` with
/// prefix `MAIL_` reads `MAIL_SMTP_HOST`.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigSource {
    prefix: String,
}

impl EnvConfigSource {
    /// Creates a source reading variables that start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Returns the variable name consulted for `key`.
    pub fn variable_name(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        let mut prev_lower = false;
        for c in key.chars() {
            if c == '-' || c == '.' || c == ' ' {
                name.push('_');
                prev_lower = false;
                continue;
            }
            if c.is_uppercase() && prev_lower {
                name.push('_');
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            name.extend(c.to_uppercase());
        }
        name
    }
}

impl ConfigSource for EnvConfigSource {
    fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        let name = self.variable_name(key);
        std::env::var(&name).map_err(|e| match e {
            std::env::VarError::NotPresent => ConfigError::NotFound { key: key.to_string() },
            std::env::VarError::NotUnicode(raw) => ConfigError::Conversion {
                key: key.to_string(),
                value: raw.to_string_lossy().into_owned(),
                target: "String",
                reason: format!("{} is not valid unicode", name),
            },
        })
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
