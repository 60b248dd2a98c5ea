use std::env;

const DEV_SESSION_SECRET: &str = "unimarket-dev-session-secret-do-not-use-in-production";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub db_pool_size: u32,
    /// Public origin of the storefront, used for checkout redirect links
    pub base_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Override for the Stripe API origin (tests point this at a local fake)
    pub stripe_api_base: String,
    pub session_secret: String,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let dev_mode = var("UNIMARKET_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = match var("PORT") {
            Some(p) => p.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("'{}' is not a port number", p),
            })?,
            None => 3000,
        };

        let db_pool_size: u32 = var("DB_POOL_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(8);

        let base_url = required(&var, "BASE_URL")?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "BASE_URL",
                reason: "must start with http:// or https://".into(),
            });
        }

        // Dev mode may fall back to a fixed secret so local runs need less setup
        let session_secret = match var("SESSION_SECRET") {
            Some(s) if !s.is_empty() => s,
            _ if dev_mode => DEV_SESSION_SECRET.to_string(),
            _ => return Err(ConfigError::Missing("SESSION_SECRET")),
        };

        Ok(Self {
            host,
            port,
            database_path: var("DATABASE_PATH")
                .unwrap_or_else(|| "unimarket.db".to_string()),
            db_pool_size,
            base_url: base_url.trim_end_matches('/').to_string(),
            stripe_secret_key: required(&var, "STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required(&var, "STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: var("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            session_secret,
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    match var(name) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}
