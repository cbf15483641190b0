use std::{env, sync::Arc};

#[derive(Clone, Debug)]
/// Configuration struct for the server.
///
/// This struct holds all the necessary configuration parameters
/// required to initialize and run the gateway: storage, dashboard
/// JWT verification, server binding, CORS, logging, the upstream
/// chat model provider and the limits handed to newly issued keys.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Configuration for verifying dashboard JWTs issued by the identity provider.
    pub jwt_config: JwtConfig,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// Maximum log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// File the logger appends to alongside stdout.
    pub log_file: String,
    /// Process-wide ceiling on requests per second, across all callers.
    pub global_requests_per_second: u32,
    /// Upstream chat model provider.
    pub provider: ProviderConfig,
    /// Limits assigned to every newly created API key.
    pub key_defaults: KeyLimitDefaults,
}

#[derive(Clone, Debug)]
/// Configuration for JSON Web Token (JWT) authentication.
///
/// Dashboard tokens are issued by the identity provider; the gateway only
/// verifies them with the shared secret.
pub struct JwtConfig {
    /// The secret key used to verify JWTs.
    pub secret: String,
}

#[derive(Clone, Debug)]
/// Connection settings for the OpenAI-compatible upstream.
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyLimitDefaults {
    pub requests_per_minute: i64,
    pub requests_per_month: i64,
    pub tokens_per_month: i64,
}

impl Default for KeyLimitDefaults {
    fn default() -> Self {
        KeyLimitDefaults {
            requests_per_minute: 60,
            requests_per_month: 10_000,
            tokens_per_month: 1_000_000,
        }
    }
}

impl JwtConfig {
    /// Creates a new `JwtConfig` instance from environment variables.
    ///
    /// Reads the JWT configuration from environment variables:
    /// - `JWT_SECRET`: Required. The secret key for JWT verification.
    ///
    /// # Panics
    ///
    /// This function will panic if the `JWT_SECRET` environment variable is not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        JwtConfig {
            secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`: `development` or `production`
    /// - `JWT_SECRET`: Secret key for JWT verification (via `JwtConfig::from_env()`)
    ///
    /// Optional (with defaults):
    /// - `DATABASE_URL`: Postgres connection string (default: unset, in-memory store)
    /// - `IP`: Server host (default: "127.0.0.1")
    /// - `PORT`: Server port (default: 8080)
    /// - `WORKERS`: Number of worker threads (default: 4)
    /// - `CORS_ALLOWED_ORIGIN`: Allowed CORS origin (default: "http://localhost:3000")
    /// - `ENABLE_CONSOLE_LOGGING`: Whether to enable console logging (default: true)
    /// - `LOG_LEVEL` / `LOG_FILE`: Logger settings (default: "info" / "gateway.log")
    /// - `GLOBAL_REQUESTS_PER_SECOND`: Process-wide limiter (default: 50)
    /// - `XAI_API_KEY`, `XAI_BASE_URL`, `UPSTREAM_TIMEOUT_SECS`: Upstream provider
    /// - `DEFAULT_REQUESTS_PER_MINUTE`, `DEFAULT_REQUESTS_PER_MONTH`,
    ///   `DEFAULT_TOKENS_PER_MONTH`: Limits for new keys
    ///
    /// # Panics
    ///
    /// This function will panic if required environment variables are missing.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        let fallback = KeyLimitDefaults::default();

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            jwt_config: JwtConfig::from_env(),
            server_host: env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parse_or("PORT", 8080),
            num_workers: parse_or("WORKERS", 4),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            console_logging_enabled: env::var("ENABLE_CONSOLE_LOGGING")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "gateway.log".to_string()),
            global_requests_per_second: parse_or("GLOBAL_REQUESTS_PER_SECOND", 50),
            provider: ProviderConfig {
                api_key: env::var("XAI_API_KEY").unwrap_or_default(),
                base_url: env::var("XAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.x.ai/v1".to_string()),
                timeout_secs: parse_or("UPSTREAM_TIMEOUT_SECS", 120),
            },
            key_defaults: KeyLimitDefaults {
                requests_per_minute: parse_or(
                    "DEFAULT_REQUESTS_PER_MINUTE",
                    fallback.requests_per_minute,
                ),
                requests_per_month: parse_or(
                    "DEFAULT_REQUESTS_PER_MONTH",
                    fallback.requests_per_month,
                ),
                tokens_per_month: parse_or("DEFAULT_TOKENS_PER_MONTH", fallback.tokens_per_month),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
