use std::{env, time::Duration};

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub default_currency: String,
    pub db_timeout: Duration,
    pub payment: PaymentConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let default_currency = env::var("DEFAULT_CURRENCY")
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|_| "USD".to_string());

        let payment = PaymentConfig {
            api_base: env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            secret_key: env::var("PAYMENT_SECRET_KEY")
                .map_err(|_| anyhow::anyhow!("PAYMENT_SECRET_KEY is not set"))?,
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .map_err(|_| anyhow::anyhow!("PAYMENT_WEBHOOK_SECRET is not set"))?,
            timeout: secs_from_env("PAYMENT_TIMEOUT_SECS", 10),
        };

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            default_currency,
            db_timeout: secs_from_env("DB_TIMEOUT_SECS", 5),
            payment,
        })
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
