//! Service configuration
//!
//! All settings come from `AGETOKEN_*` environment variables, read once at
//! startup. Every variable has a default except the ones that select an
//! optional backend (`AGETOKEN_ANCHOR_URL`, `AGETOKEN_REVOCATION_LOG`,
//! `AGETOKEN_DATABASE_URL`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::core::AnchorFailurePolicy;

/// Default issuer identifier placed in `iss`
pub const DEFAULT_ISSUER: &str = "age-token-issuer";
/// Default audience placed in `aud`
pub const DEFAULT_AUDIENCE: &str = "age-gated-sites";
/// Default age threshold
pub const DEFAULT_AGE_OVER: u8 = 18;
/// Default token lifetime (24 hours)
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Invalid configuration value
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub port: u16,
    pub log_level: Level,
    pub key_file: PathBuf,
    /// Refuse to start without an existing key file
    pub strict_key_load: bool,
    /// How long a rotated-out key keeps verifying
    pub key_grace: Duration,
    pub issuer: String,
    pub audience: String,
    pub age_over: u8,
    pub token_lifetime_secs: i64,
    /// Remote bulletin board; `None` runs an in-process board
    pub anchor_url: Option<String>,
    pub publisher_key_file: PathBuf,
    pub anchor_timeout: Duration,
    /// Zero disables caching of anchor reads
    pub anchor_cache_ttl: Duration,
    pub anchor_failure_policy: AnchorFailurePolicy,
    /// Zero disables periodic root reconciliation
    pub root_sync_interval: Duration,
    /// JSON-lines revocation log; `None` keeps revocations in memory
    pub revocation_log: Option<PathBuf>,
    pub database_url: Option<String>,
    pub accept_legacy: bool,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: Level::INFO,
            key_file: PathBuf::from("issuer_ed25519.jwk"),
            strict_key_load: false,
            key_grace: Duration::ZERO,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            age_over: DEFAULT_AGE_OVER,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            anchor_url: None,
            publisher_key_file: PathBuf::from("publisher_ed25519.jwk"),
            anchor_timeout: agetoken_anchor::DEFAULT_ANCHOR_TIMEOUT,
            anchor_cache_ttl: Duration::ZERO,
            anchor_failure_policy: AnchorFailurePolicy::FailClosed,
            root_sync_interval: Duration::from_secs(300),
            revocation_log: None,
            database_url: None,
            accept_legacy: false,
        }
    }
}

impl IssuerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let token_lifetime_secs = env.parse("AGETOKEN_TOKEN_LIFETIME_SECS", defaults.token_lifetime_secs)?;
        if token_lifetime_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "AGETOKEN_TOKEN_LIFETIME_SECS",
                value: token_lifetime_secs.to_string(),
                reason: "must be positive".into(),
            });
        }
        let age_over: u8 = env.parse("AGETOKEN_AGE_OVER", defaults.age_over)?;
        if age_over == 0 {
            return Err(ConfigError::Invalid {
                name: "AGETOKEN_AGE_OVER",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            port: env.parse("AGETOKEN_PORT", defaults.port)?,
            log_level: env.parse("AGETOKEN_LOG_LEVEL", defaults.log_level)?,
            key_file: env.string("AGETOKEN_KEY_FILE").map(PathBuf::from).unwrap_or(defaults.key_file),
            strict_key_load: env.flag("AGETOKEN_STRICT_KEY_LOAD", defaults.strict_key_load)?,
            key_grace: Duration::from_secs(env.parse("AGETOKEN_KEY_GRACE_SECS", 0u64)?),
            issuer: env.string("AGETOKEN_ISSUER").unwrap_or(defaults.issuer),
            audience: env.string("AGETOKEN_AUDIENCE").unwrap_or(defaults.audience),
            age_over,
            token_lifetime_secs,
            anchor_url: env.string("AGETOKEN_ANCHOR_URL"),
            publisher_key_file: env
                .string("AGETOKEN_PUBLISHER_KEY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.publisher_key_file),
            anchor_timeout: Duration::from_millis(env.parse(
                "AGETOKEN_ANCHOR_TIMEOUT_MS",
                defaults.anchor_timeout.as_millis() as u64,
            )?),
            anchor_cache_ttl: Duration::from_millis(env.parse("AGETOKEN_ANCHOR_CACHE_TTL_MS", 0u64)?),
            anchor_failure_policy: env.parse(
                "AGETOKEN_ANCHOR_FAILURE_POLICY",
                defaults.anchor_failure_policy,
            )?,
            root_sync_interval: Duration::from_secs(env.parse(
                "AGETOKEN_ROOT_SYNC_SECS",
                defaults.root_sync_interval.as_secs(),
            )?),
            revocation_log: env.string("AGETOKEN_REVOCATION_LOG").map(PathBuf::from),
            database_url: env.string("AGETOKEN_DATABASE_URL"),
            accept_legacy: env.flag("AGETOKEN_ACCEPT_LEGACY", defaults.accept_legacy)?,
        })
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                name,
                value,
                reason: "expected true or false".into(),
            }),
        }
    }
}
