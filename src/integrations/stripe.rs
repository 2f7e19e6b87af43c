//! Thin Stripe API client.
//!
//! Form-encoded POSTs against `/v1`, authenticated with the secret key, plus
//! webhook event construction with the same semantics as Stripe's SDKs:
//! HMAC-SHA256 over `"{timestamp}.{payload}"`, a freshness tolerance and a
//! constant-time comparison.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::config::StripeConfig;
use crate::error::ApiError;

/// Signature freshness window, matching stripe-go's default.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: String,
}

impl StripeClient {
    pub fn new(cfg: &StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
        }
    }

    async fn post_form<T, F>(&self, path: &str, params: &F) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        F: serde::Serialize + ?Sized,
    {
        let url = format!("{}/v1/{path}", self.api_base);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params)
            .send()
            .await
            .map_err(|e| ApiError::Integration(format!("stripe request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            resp.json::<T>()
                .await
                .map_err(|e| ApiError::Integration(format!("stripe response decode failed: {e}")))
        } else {
            let message = resp
                .json::<StripeErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("http {status}"));
            Err(ApiError::Integration(format!("stripe: {message}")))
        }
    }

    /// Create a subscription-mode checkout session.
    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_email: &str,
        success_url: &str,
        cancel_url: &str,
        metadata: &[(&str, String)],
    ) -> Result<CheckoutSession, ApiError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "subscription".to_string()),
            ("line_items[0][price]".into(), price_id.to_string()),
            ("line_items[0][quantity]".into(), "1".to_string()),
            ("customer_email".into(), customer_email.to_string()),
            ("success_url".into(), success_url.to_string()),
            ("cancel_url".into(), cancel_url.to_string()),
        ];
        for (key, value) in metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }
        self.post_form("checkout/sessions", &params).await
    }

    /// Create a billing portal session for an existing customer.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, ApiError> {
        let params = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        self.post_form("billing_portal/sessions", &params).await
    }

    /// Flag a subscription for cancellation at the end of the current period.
    pub async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<Subscription, ApiError> {
        let params = [("cancel_at_period_end", "true".to_string())];
        self.post_form(&format!("subscriptions/{subscription_id}"), &params)
            .await
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, ApiError> {
        let url = format!("{}/v1/subscriptions/{subscription_id}", self.api_base);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ApiError::Integration(format!("stripe request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            resp.json::<Subscription>()
                .await
                .map_err(|e| ApiError::Integration(format!("stripe response decode failed: {e}")))
        } else {
            let message = resp
                .json::<StripeErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("http {status}"));
            Err(ApiError::Integration(format!("stripe: {message}")))
        }
    }
}

/// A verified webhook event.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// Verify the `Stripe-Signature` header and parse the event.
pub fn construct_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<WebhookEvent, ApiError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ApiError::Unauthorized("malformed Stripe-Signature header".into()))?;
    if signatures.is_empty() {
        return Err(ApiError::Unauthorized("missing v1 signature".into()));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(ApiError::Unauthorized("webhook timestamp outside tolerance".into()));
    }

    // Mac::verify_slice is constant-time; accept if any provided v1 matches.
    let matched = signatures.iter().any(|sig| {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(sig).is_ok()
    });
    if !matched {
        return Err(ApiError::Unauthorized("webhook signature mismatch".into()));
    }

    serde_json::from_slice(payload)
        .map_err(|e| ApiError::validation(format!("malformed webhook payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    const PAYLOAD: &[u8] =
        br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#;

    #[test]
    fn valid_signature_parses_event() {
        let header = sign(PAYLOAD, "whsec_test", 1_700_000_000);
        let event = construct_event(PAYLOAD, &header, "whsec_test", 1_700_000_010).unwrap();
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.data.object["id"], "in_1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign(PAYLOAD, "whsec_other", 1_700_000_000);
        assert!(construct_event(PAYLOAD, &header, "whsec_test", 1_700_000_010).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = sign(PAYLOAD, "whsec_test", 1_700_000_000);
        let err = construct_event(PAYLOAD, &header, "whsec_test", 1_700_000_000 + 301);
        assert!(err.is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(PAYLOAD, "whsec_test", 1_700_000_000);
        let tampered = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{"id":"in_2"}}}"#;
        assert!(construct_event(tampered, &header, "whsec_test", 1_700_000_010).is_err());
    }

    #[test]
    fn header_without_timestamp_is_rejected() {
        assert!(construct_event(PAYLOAD, "v1=abcd", "whsec_test", 0).is_err());
    }

    #[tokio::test]
    async fn checkout_session_request_hits_stripe_form_api() {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=subscription"))
            .and(body_string_contains("line_items%5B0%5D%5Bprice%5D=price_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.test/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new(&crate::config::StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            api_base: server.uri(),
            prices: Default::default(),
        });

        let session = client
            .create_checkout_session(
                "price_123",
                "clinic@example.com",
                "https://app.test/ok",
                "https://app.test/cancel",
                &[("tenant_id", "3".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test_1");
        assert_eq!(session.url.as_deref(), Some("https://checkout.stripe.test/cs_test_1"));
    }

    #[tokio::test]
    async fn stripe_error_body_surfaces_message() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/billing_portal/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "No such customer: cus_x" }
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new(&crate::config::StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            api_base: server.uri(),
            prices: Default::default(),
        });

        let err = client
            .create_portal_session("cus_x", "https://app.test")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such customer"));
    }
}
