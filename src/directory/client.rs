//! HTTP client for the platform directory service, which owns user and
//! partner records. This service only ever needs narrow lookups: who is this
//! user, which partner is this, and which user account a partner is linked
//! to for wallet ownership.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response from directory: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRef {
    pub id: Uuid,
    pub name: Option<String>,
    /// The user account the partner's wallet hangs off. Partners without a
    /// linked account cannot hold a wallet.
    pub linked_user_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl DirectoryClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(30), Duration::from_secs(60));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        DirectoryClient {
            client,
            base_url,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, DirectoryError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let client = self.client.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.get(&url).send().await?;

                if response.status() == 404 {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(DirectoryError::InvalidResponse(format!(
                        "directory returned status {}",
                        response.status()
                    )));
                }

                let parsed = response.json::<T>().await?;
                Ok(Some(parsed))
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(DirectoryError::CircuitBreakerOpen(
                "directory circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRef>, DirectoryError> {
        self.get_json(&format!("/users/{}", id)).await
    }

    pub async fn get_partner(&self, id: Uuid) -> Result<Option<PartnerRef>, DirectoryError> {
        self.get_json(&format!("/partners/{}", id)).await
    }

    /// The partner record operated by a given user account, if any. Used to
    /// check that a partner-role caller redeems only at their own business.
    pub async fn find_partner_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PartnerRef>, DirectoryError> {
        self.get_json(&format!("/partners/by-user/{}", user_id)).await
    }

    /// Bumps the partner's redemption/revenue analytics counters. Best-effort;
    /// callers log failures and move on.
    pub async fn record_partner_redemption(
        &self,
        partner_id: Uuid,
        amount: &bigdecimal::BigDecimal,
    ) -> Result<(), DirectoryError> {
        let url = format!(
            "{}/partners/{}/redemptions",
            self.base_url.trim_end_matches('/'),
            partner_id
        );
        let client = self.client.clone();
        let body = serde_json::json!({ "amount": amount });

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.post(&url).json(&body).send().await?;
                if !response.status().is_success() {
                    return Err(DirectoryError::InvalidResponse(format!(
                        "directory returned status {}",
                        response.status()
                    )));
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(FailsafeError::Rejected) => Err(DirectoryError::CircuitBreakerOpen(
                "directory circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_client_creation() {
        let client = DirectoryClient::new("http://localhost:4000".to_string());
        assert_eq!(client.base_url, "http://localhost:4000");
    }

    #[test]
    fn test_circuit_breaker_state() {
        let client = DirectoryClient::new("http://localhost:4000".to_string());
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    #[ignore]
    async fn test_get_partner_with_mock() {
        let mut server = mockito::Server::new_async().await;
        let partner_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r".*/partners/.*".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"{}","name":"Sai Canteen","linkedUserId":"{}","status":"approved"}}"#,
                partner_id, user_id
            ))
            .create();

        let client = DirectoryClient::new(server.url());
        let partner = client.get_partner(partner_id).await.unwrap().unwrap();

        assert_eq!(partner.id, partner_id);
        assert_eq!(partner.linked_user_id, Some(user_id));
    }

    #[tokio::test]
    #[ignore]
    async fn test_get_partner_not_found() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r".*/partners/.*".into()))
            .with_status(404)
            .create();

        let client = DirectoryClient::new(server.url());
        let result = client.get_partner(Uuid::new_v4()).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r".*/users/.*".into()))
            .with_status(500)
            .expect_at_least(3)
            .create();

        let client = DirectoryClient::new(server.url());
        for _ in 0..3 {
            let _ = client.get_user(Uuid::new_v4()).await;
        }

        let result = client.get_user(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DirectoryError::CircuitBreakerOpen(_))));
    }
}
