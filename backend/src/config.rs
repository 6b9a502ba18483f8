use crate::error::ConfigError;
use std::{env, fmt, str::FromStr};

const LOCAL_SIGNING_KEY: &str = "local-development-signing-key-not-for-production";
const MIN_PRODUCTION_KEY_LEN: usize = 32;

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded
/// and pulled into handlers via `FromRef`. Every lifetime and cost parameter
/// of the auth core is configurable here; nothing security-relevant is
/// hard-coded in the services themselves.
#[derive(Clone)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and how strict loading is.
    pub env: Env,
    // Postgres connection string. `None` runs on the in-memory repository (local only).
    pub db_url: Option<String>,
    pub bind_addr: String,
    // Access token signing keys (current + retired, for rotation).
    pub jwt: JwtSettings,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub password_min_length: usize,
    pub hashing: HashingParams,
    // Deadline applied to every request; store calls inherit it.
    pub request_timeout_secs: u64,
}

/// Env
///
/// Defines the runtime context.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// SigningKey
///
/// One HMAC key for access tokens, addressed by `kid`. `Debug` never prints
/// the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub kid: String,
    pub secret: String,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// JwtSettings
///
/// `current` signs new tokens; `retired` keys are still accepted for
/// verification so tokens minted before a key rotation stay valid until expiry.
#[derive(Clone, Debug)]
pub struct JwtSettings {
    pub current: SigningKey,
    pub retired: Vec<SigningKey>,
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    // OWASP-recommended Argon2id baseline.
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Default for AppConfig {
    /// default
    ///
    /// Provides a safe, non-panicking AppConfig instance primarily used for test setup.
    /// Hashing cost is turned all the way down so test suites stay fast.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            bind_addr: "127.0.0.1:3000".to_string(),
            jwt: JwtSettings {
                current: SigningKey {
                    kid: "test".to_string(),
                    secret: "super-secure-test-secret-value-local".to_string(),
                },
                retired: Vec::new(),
            },
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 30 * 24 * 60 * 60,
            password_min_length: 8,
            hashing: HashingParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            request_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the process environment (call `dotenv`
    /// first). Production refuses to start without a real signing key and a
    /// database; local mode falls back to development defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// from_lookup
    ///
    /// Same as `load`, reading variables through `lookup` instead of the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup("APP_ENV").as_deref() {
            Some("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if env == Env::Production && db_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        // JWT Key Resolution
        let secret = match (lookup("JWT_SIGNING_KEY"), &env) {
            (Some(secret), Env::Production) if secret.len() < MIN_PRODUCTION_KEY_LEN => {
                return Err(ConfigError::Invalid {
                    var: "JWT_SIGNING_KEY",
                    reason: format!("must be at least {MIN_PRODUCTION_KEY_LEN} bytes"),
                });
            }
            (Some(secret), _) => secret,
            (None, Env::Production) => return Err(ConfigError::Missing("JWT_SIGNING_KEY")),
            (None, Env::Local) => LOCAL_SIGNING_KEY.to_string(),
        };
        let current = SigningKey {
            kid: lookup("JWT_KEY_ID").unwrap_or_else(|| "primary".to_string()),
            secret,
        };
        let retired = match lookup("JWT_RETIRED_KEYS") {
            Some(raw) => parse_retired_keys(&raw)?,
            None => Vec::new(),
        };
        if retired.iter().any(|k| k.kid == current.kid) {
            return Err(ConfigError::Invalid {
                var: "JWT_RETIRED_KEYS",
                reason: "retired key id collides with JWT_KEY_ID".to_string(),
            });
        }

        let defaults = HashingParams::default();
        let config = Self {
            env,
            db_url,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            jwt: JwtSettings { current, retired },
            access_token_ttl_secs: parse_or(&lookup, "ACCESS_TOKEN_TTL_SECS", 15 * 60)?,
            refresh_token_ttl_secs: parse_or(&lookup, "REFRESH_TOKEN_TTL_SECS", 30 * 24 * 60 * 60)?,
            password_min_length: parse_or(&lookup, "PASSWORD_MIN_LENGTH", 8)?,
            hashing: HashingParams {
                memory_kib: parse_or(&lookup, "ARGON2_MEMORY_KIB", defaults.memory_kib)?,
                iterations: parse_or(&lookup, "ARGON2_ITERATIONS", defaults.iterations)?,
                parallelism: parse_or(&lookup, "ARGON2_PARALLELISM", defaults.parallelism)?,
            },
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 10)?,
        };

        if config.access_token_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_TTL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if config.refresh_token_ttl_secs <= config.access_token_ttl_secs {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_TTL_SECS",
                reason: "must exceed the access token lifetime".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parses `kid:secret,kid:secret`.
fn parse_retired_keys(raw: &str) -> Result<Vec<SigningKey>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((kid, secret)) if !kid.is_empty() && !secret.is_empty() => Ok(SigningKey {
                kid: kid.to_string(),
                secret: secret.to_string(),
            }),
            _ => Err(ConfigError::Invalid {
                var: "JWT_RETIRED_KEYS",
                reason: "expected comma-separated kid:secret pairs".to_string(),
            }),
        })
        .collect()
}
