use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

pub mod packages;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Base URL of the platform directory service (user + partner lookups).
    pub directory_base_url: String,
    /// Base URL of the notification dispatcher. Unset disables dispatch.
    pub notifier_base_url: Option<String>,
    /// Base URL under which rendered coupon QR images are served.
    pub qr_base_url: String,
    /// When true, redeeming a percentage coupon without a purchase amount
    /// fails validation instead of recording a zero-value redemption.
    pub require_purchase_amount: bool,
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            directory_base_url: env::var("DIRECTORY_BASE_URL")?,
            notifier_base_url: env::var("NOTIFIER_BASE_URL").ok(),
            qr_base_url: env::var("QR_BASE_URL")
                .unwrap_or_else(|_| "https://cdn.seva.org/qr".to_string()),
            require_purchase_amount: env::var("REQUIRE_PURCHASE_AMOUNT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_purchase_amount_defaults_off() {
        let config = Config {
            server_port: 3000,
            database_url: "postgres://localhost/seva".to_string(),
            directory_base_url: "http://localhost:4000".to_string(),
            notifier_base_url: None,
            qr_base_url: "https://cdn.seva.org/qr".to_string(),
            require_purchase_amount: false,
            cors_allowed_origins: None,
        };
        assert!(!config.require_purchase_amount);
    }
}
