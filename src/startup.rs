use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub directory: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.directory
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Directory Connectivity: {}", status(self.directory));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!(
            "\nOverall Status: {}",
            if self.is_valid() { "✅ PASS" } else { "❌ FAIL" }
        );
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        directory: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_directory(&config.directory_base_url).await {
        report.directory = false;
        report.errors.push(format!("Directory: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.directory_base_url.is_empty() {
        anyhow::bail!("DIRECTORY_BASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }

    url::Url::parse(&config.directory_base_url)
        .context("DIRECTORY_BASE_URL is not a valid URL")?;
    url::Url::parse(&config.qr_base_url).context("QR_BASE_URL is not a valid URL")?;
    if let Some(notifier_url) = &config.notifier_base_url {
        url::Url::parse(notifier_url).context("NOTIFIER_BASE_URL is not a valid URL")?;
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_directory(directory_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(directory_url)
        .send()
        .await
        .context("Failed to connect to directory service")?;

    if response.status().is_server_error() {
        anyhow::bail!("Directory returned status: {}", response.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/seva".to_string(),
            directory_base_url: "http://localhost:4000".to_string(),
            notifier_base_url: None,
            qr_base_url: "https://cdn.seva.org/qr".to_string(),
            require_purchase_amount: false,
            cors_allowed_origins: None,
        }
    }

    #[test]
    fn test_validate_env_vars_empty_database_url() {
        let mut config = base_config();
        config.database_url = String::new();

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_invalid_directory_url() {
        let mut config = base_config();
        config.directory_base_url = "not-a-url".to_string();

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_ok() {
        assert!(validate_env_vars(&base_config()).is_ok());
    }
}
