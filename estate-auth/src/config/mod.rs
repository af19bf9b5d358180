use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub device: DeviceConfig,
    pub store: StoreConfig,
    pub cookie: CookieConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

/// One HS256 secret per token class, so a leaked key cannot mint another class.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: Secret<String>,
    pub refresh_secret: Secret<String>,
    pub offline_secret: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub offline_token_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
    /// Credentials loaded at startup. Zero disables warm-up.
    pub warmup_size: usize,
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Consecutive successful validations before a device becomes trusted.
    pub trust_threshold: u32,
    pub max_devices_per_principal: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub access_cookie: String,
    pub refresh_cookie: String,
    pub csrf_cookie: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSitePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub admin_api_key: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("estate-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "20", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2", is_prod)?,
                acquire_timeout_seconds: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "5", is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: Secret::new(get_env("JWT_ACCESS_SECRET", None, is_prod)?),
                refresh_secret: Secret::new(get_env("JWT_REFRESH_SECRET", None, is_prod)?),
                offline_secret: Secret::new(get_env("JWT_OFFLINE_SECRET", None, is_prod)?),
                issuer: get_env("JWT_ISSUER", Some("estate-auth"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("estate-clients"), is_prod)?,
                access_token_minutes: parse_env("JWT_ACCESS_TOKEN_MINUTES", "15", is_prod)?,
                refresh_token_days: parse_env("JWT_REFRESH_TOKEN_DAYS", "7", is_prod)?,
                offline_token_days: parse_env("JWT_OFFLINE_TOKEN_DAYS", "30", is_prod)?,
            },
            cache: CacheConfig {
                capacity: parse_env("SESSION_CACHE_CAPACITY", "10000", is_prod)?,
                ttl_seconds: parse_env("SESSION_CACHE_TTL_SECONDS", "300", is_prod)?,
                warmup_size: parse_env("SESSION_CACHE_WARMUP_SIZE", "1000", is_prod)?,
                purge_interval_seconds: parse_env("SESSION_CACHE_PURGE_SECONDS", "60", is_prod)?,
            },
            device: DeviceConfig {
                trust_threshold: parse_env("DEVICE_TRUST_THRESHOLD", "5", is_prod)?,
                max_devices_per_principal: parse_env("DEVICE_MAX_PER_PRINCIPAL", "5", is_prod)?,
            },
            store: StoreConfig {
                call_timeout_ms: parse_env("STORE_CALL_TIMEOUT_MS", "2000", is_prod)?,
                max_retries: parse_env("STORE_MAX_RETRIES", "2", is_prod)?,
                initial_backoff_ms: parse_env("STORE_INITIAL_BACKOFF_MS", "50", is_prod)?,
            },
            cookie: CookieConfig {
                access_cookie: get_env("COOKIE_ACCESS_NAME", Some("estate_session"), is_prod)?,
                refresh_cookie: get_env("COOKIE_REFRESH_NAME", Some("estate_refresh"), is_prod)?,
                csrf_cookie: get_env("COOKIE_CSRF_NAME", Some("estate_csrf"), is_prod)?,
                domain: env::var("COOKIE_DOMAIN").ok().filter(|d| !d.trim().is_empty()),
                secure: parse_env("COOKIE_SECURE", if is_prod { "true" } else { "false" }, false)?,
                same_site: get_env("COOKIE_SAME_SITE", Some("strict"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                admin_api_key: Secret::new(get_env("ADMIN_API_KEY", None, true)?),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                login_window_seconds: get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(900),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_minutes <= 0
            || self.jwt.refresh_token_days <= 0
            || self.jwt.offline_token_days <= 0
        {
            return Err(config_error("Token lifetimes must be positive"));
        }

        // A cache entry must never outlive the access token it mirrors.
        let access_seconds = self.jwt.access_token_minutes.unsigned_abs() * 60;
        if self.cache.ttl_seconds == 0 || self.cache.ttl_seconds >= access_seconds {
            return Err(config_error(
                "SESSION_CACHE_TTL_SECONDS must be positive and shorter than the access token lifetime",
            ));
        }

        if self.cache.capacity == 0 {
            return Err(config_error("SESSION_CACHE_CAPACITY must be positive"));
        }

        let secrets = [
            self.jwt.access_secret.expose_secret(),
            self.jwt.refresh_secret.expose_secret(),
            self.jwt.offline_secret.expose_secret(),
        ];
        if secrets.iter().any(|s| s.len() < 32) {
            return Err(config_error("JWT secrets must be at least 32 bytes"));
        }
        if secrets[0] == secrets[1] || secrets[0] == secrets[2] || secrets[1] == secrets[2] {
            return Err(config_error("JWT secrets must differ per token type"));
        }

        // Credentialed CORS never accepts a wildcard, in any environment.
        if self.security.allowed_origins.iter().any(|o| o == "*") {
            return Err(config_error("Wildcard CORS origin is not allowed"));
        }

        if self.device.trust_threshold == 0 {
            return Err(config_error("DEVICE_TRUST_THRESHOLD must be positive"));
        }

        if self.environment == Environment::Prod {
            if !self.cookie.secure {
                return Err(config_error("Secure cookies are required in production"));
            }
            if self
                .security
                .allowed_origins
                .iter()
                .any(|o| o.starts_with("http://"))
            {
                tracing::error!("Plain-http CORS origin configured in production");
            }
        }

        if self.cookie.same_site == SameSitePolicy::None && !self.cookie.secure {
            return Err(config_error("SameSite=None cookies must be Secure"));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SameSitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(SameSitePolicy::Strict),
            "lax" => Ok(SameSitePolicy::Lax),
            "none" => Ok(SameSitePolicy::None),
            _ => Err(format!("Invalid SameSite policy: {}", s)),
        }
    }
}

impl AuthConfig {
    /// Fully populated dev configuration with throwaway secrets, for tests
    /// and local tooling. Never loaded by the binary.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "estate-auth".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            database: DatabaseConfig {
                url: "postgres://localhost/estate_auth_test".to_string(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout_seconds: 1,
            },
            jwt: JwtConfig {
                access_secret: Secret::new("access-secret-0123456789abcdef0123456789".to_string()),
                refresh_secret: Secret::new("refresh-secret-0123456789abcdef012345678".to_string()),
                offline_secret: Secret::new("offline-secret-0123456789abcdef012345678".to_string()),
                issuer: "estate-auth".to_string(),
                audience: "estate-clients".to_string(),
                access_token_minutes: 15,
                refresh_token_days: 7,
                offline_token_days: 30,
            },
            cache: CacheConfig {
                capacity: 1000,
                ttl_seconds: 60,
                warmup_size: 100,
                purge_interval_seconds: 60,
            },
            device: DeviceConfig {
                trust_threshold: 3,
                max_devices_per_principal: 2,
            },
            store: StoreConfig {
                call_timeout_ms: 200,
                max_retries: 2,
                initial_backoff_ms: 1,
            },
            cookie: CookieConfig {
                access_cookie: "estate_session".to_string(),
                refresh_cookie: "estate_refresh".to_string(),
                csrf_cookie: "estate_csrf".to_string(),
                domain: None,
                secure: false,
                same_site: SameSitePolicy::Strict,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                admin_api_key: Secret::new("test-admin-key".to_string()),
            },
            rate_limit: RateLimitConfig {
                login_attempts: 100,
                login_window_seconds: 60,
            },
        }
    }
}
