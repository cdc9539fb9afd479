//! Notification dispatch seam. Delivery (email/SMS/WhatsApp) is owned by the
//! platform notification service; from here it is fire-and-forget — a failed
//! dispatch is logged and never rolls back coupon or wallet state.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::coupon::Coupon;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Dispatcher returned status {0}")]
    BadStatus(u16),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMethods {
    pub email: bool,
    pub sms: bool,
    pub whatsapp: bool,
}

impl Default for DeliveryMethods {
    fn default() -> Self {
        Self {
            email: true,
            sms: true,
            whatsapp: true,
        }
    }
}

/// Per-channel outcome as reported by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_coupon(
        &self,
        coupon: &Coupon,
        recipient: &Recipient,
        methods: &DeliveryMethods,
    ) -> Result<ChannelResults, NotifyError>;
}

/// Posts to the platform notification service.
pub struct HttpNotifier {
    client: Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotifier {
    async fn send_coupon(
        &self,
        coupon: &Coupon,
        recipient: &Recipient,
        methods: &DeliveryMethods,
    ) -> Result<ChannelResults, NotifyError> {
        let url = format!(
            "{}/notifications/coupon",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "coupon": {
                "code": coupon.code,
                "title": coupon.title,
                "qrCode": coupon.qr_code,
                "validUntil": coupon.validity.end_date,
            },
            "recipient": recipient,
            "methods": methods,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::BadStatus(response.status().as_u16()));
        }

        Ok(response.json::<ChannelResults>().await?)
    }
}

/// Used when no dispatcher is configured; logs and reports nothing sent.
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn send_coupon(
        &self,
        coupon: &Coupon,
        _recipient: &Recipient,
        _methods: &DeliveryMethods,
    ) -> Result<ChannelResults, NotifyError> {
        tracing::info!(code = %coupon.code, "notification dispatch disabled, skipping send");
        Ok(ChannelResults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_methods_default_to_all_channels() {
        let methods = DeliveryMethods::default();
        assert!(methods.email && methods.sms && methods.whatsapp);
    }

    #[test]
    fn channel_results_serialize_skips_missing_channels() {
        let results = ChannelResults {
            email: Some("sent".to_string()),
            sms: None,
            whatsapp: None,
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["email"], "sent");
        assert!(json.get("sms").is_none());
    }
}
