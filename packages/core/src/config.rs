/// Runtime configuration for the document store
use serde::{Deserialize, Serialize};

/// Upper bound for generated counter widths (fits in an i64 series value)
const MAX_COUNTER_DIGITS: usize = 18;

/// Configuration shared by the database and document services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocStoreConfig {
    /// How long a connection waits on a locked database before failing (ms)
    pub busy_timeout_ms: u64,

    /// Drop in-memory fields that are not columns instead of rejecting the write
    pub tolerant_writes: bool,

    /// Counter width appended to `naming_series` prefixes without a `#` segment
    pub naming_series_digits: usize,

    /// Counter width of the global fallback series
    pub fallback_digits: usize,

    /// Longest accepted document name
    pub max_name_length: usize,

    /// User recorded in audit fields when no acting user is set
    pub default_user: String,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            tolerant_writes: true,
            naming_series_digits: 5,
            fallback_digits: 9,
            max_name_length: 140,
            default_user: "Administrator".to_string(),
        }
    }
}

impl DocStoreConfig {
    /// Defaults overridden by `DOCSPACE_BUSY_TIMEOUT_MS`,
    /// `DOCSPACE_TOLERANT_WRITES` and `DOCSPACE_DEFAULT_USER`
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("DOCSPACE_BUSY_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.busy_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid DOCSPACE_BUSY_TIMEOUT_MS '{}'", raw),
            }
        }

        if let Some(raw) = lookup("DOCSPACE_TOLERANT_WRITES") {
            match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => config.tolerant_writes = true,
                "0" | "false" | "no" => config.tolerant_writes = false,
                _ => tracing::warn!("Ignoring invalid DOCSPACE_TOLERANT_WRITES '{}'", raw),
            }
        }

        if let Some(user) = lookup("DOCSPACE_DEFAULT_USER") {
            if !user.trim().is_empty() {
                config.default_user = user.trim().to_string();
            }
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.naming_series_digits == 0 || self.naming_series_digits > MAX_COUNTER_DIGITS {
            return Err(format!(
                "naming_series_digits must be between 1 and {}",
                MAX_COUNTER_DIGITS
            ));
        }

        if self.fallback_digits == 0 || self.fallback_digits > MAX_COUNTER_DIGITS {
            return Err(format!(
                "fallback_digits must be between 1 and {}",
                MAX_COUNTER_DIGITS
            ));
        }

        if self.max_name_length == 0 {
            return Err("max_name_length must be greater than 0".to_string());
        }

        if self.default_user.trim().is_empty() {
            return Err("default_user cannot be empty".to_string());
        }

        Ok(())
    }
}
