//! Meta WhatsApp Business (Graph API) client.
//!
//! Outbound template messages and template listing; inbound webhook payload
//! types live here too so the webhook handler and tests share them.

use serde::{Deserialize, Serialize};

use crate::config::WhatsAppConfig;
use crate::error::ApiError;

#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base: String,
    api_version: String,
    access_token: String,
    pub phone_number_id: String,
    pub business_account_id: String,
    pub webhook_verify_token: String,
}

// ---- outbound payloads ----

#[derive(Debug, Serialize)]
pub struct TemplateMessage {
    pub messaging_product: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub template: Template,
}

#[derive(Debug, Serialize)]
pub struct Template {
    pub name: String,
    pub language: TemplateLanguage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Serialize)]
pub struct TemplateLanguage {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub component_type: &'static str,
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Debug, Serialize)]
pub struct TemplateParameter {
    #[serde(rename = "type")]
    pub parameter_type: &'static str,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateList {
    #[serde(default)]
    pub data: Vec<TemplateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

// ---- inbound webhook payloads ----

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: WebhookValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<MessageStatus>,
    #[serde(default)]
    pub contacts: Vec<InboundContact>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<InboundText>,
}

#[derive(Debug, Deserialize)]
pub struct InboundText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundContact {
    #[serde(default)]
    pub profile: Option<ContactProfile>,
    pub wa_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageStatus {
    pub id: String,
    pub status: String, // sent, delivered, read, failed
    pub recipient_id: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    message: String,
}

impl WhatsAppClient {
    pub fn new(cfg: &WhatsAppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            access_token: cfg.access_token.clone(),
            phone_number_id: cfg.phone_number_id.clone(),
            business_account_id: cfg.business_account_id.clone(),
            webhook_verify_token: cfg.webhook_verify_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.api_base, self.api_version)
    }

    /// Send an approved template message with positional body parameters.
    pub async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        language: &str,
        body_parameters: &[String],
    ) -> Result<SendMessageResponse, ApiError> {
        let components = if body_parameters.is_empty() {
            Vec::new()
        } else {
            vec![TemplateComponent {
                component_type: "body",
                parameters: body_parameters
                    .iter()
                    .map(|text| TemplateParameter { parameter_type: "text", text: text.clone() })
                    .collect(),
            }]
        };

        let message = TemplateMessage {
            messaging_product: "whatsapp",
            to: normalize_phone(to),
            message_type: "template",
            template: Template {
                name: template_name.to_string(),
                language: TemplateLanguage { code: language.to_string() },
                components,
            },
        };

        let url = self.url(&format!("{}/messages", self.phone_number_id));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| ApiError::Integration(format!("whatsapp request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            resp.json().await.map_err(|e| {
                ApiError::Integration(format!("whatsapp response decode failed: {e}"))
            })
        } else {
            let message = resp
                .json::<GraphErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("http {status}"));
            Err(ApiError::Integration(format!("whatsapp: {message}")))
        }
    }

    /// Fetch templates for the business account, keeping only approved ones.
    pub async fn approved_templates(&self) -> Result<Vec<TemplateInfo>, ApiError> {
        let url = self.url(&format!(
            "{}/message_templates?fields=name,status,category,language",
            self.business_account_id
        ));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ApiError::Integration(format!("whatsapp request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Integration(format!("whatsapp: http {status}")));
        }
        let list: TemplateList = resp.json().await.map_err(|e| {
            ApiError::Integration(format!("whatsapp response decode failed: {e}"))
        })?;
        Ok(list
            .data
            .into_iter()
            .filter(|t| t.status.eq_ignore_ascii_case("APPROVED"))
            .collect())
    }
}

/// Keep digits only; the Graph API wants E.164 without the plus sign.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> WhatsAppClient {
        WhatsAppClient::new(&crate::config::WhatsAppConfig {
            access_token: "token".into(),
            phone_number_id: "111222".into(),
            business_account_id: "333444".into(),
            webhook_verify_token: "verify-me".into(),
            api_base: base.to_string(),
            api_version: "v18.0".into(),
        })
    }

    #[test]
    fn normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+55 (11) 98888-7777"), "5511988887777");
    }

    #[test]
    fn inbound_webhook_payload_parses() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "entry": [{
                    "changes": [{
                        "value": {
                            "contacts": [{"profile": {"name": "Maria"}, "wa_id": "5511988887777"}],
                            "messages": [{
                                "from": "5511988887777",
                                "id": "wamid.1",
                                "type": "text",
                                "text": {"body": "Quero agendar uma consulta"}
                            }]
                        }
                    }]
                }]
            }"#,
        )
        .unwrap();

        let value = &payload.entry[0].changes[0].value;
        assert_eq!(value.messages[0].from, "5511988887777");
        assert_eq!(value.messages[0].text.as_ref().unwrap().body, "Quero agendar uma consulta");
        assert_eq!(value.contacts[0].profile.as_ref().unwrap().name, "Maria");
    }

    #[tokio::test]
    async fn send_template_posts_to_graph_api() {
        use wiremock::matchers::{body_partial_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/111222/messages"))
            .and(header("Authorization", "Bearer token"))
            .and(body_partial_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "5511988887777",
                "type": "template",
                "template": {
                    "name": "appointment_reminder",
                    "language": {"code": "pt_BR"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.out.1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(&server.uri())
            .send_template(
                "+55 11 98888-7777",
                "appointment_reminder",
                "pt_BR",
                &["Maria".to_string(), "14:30".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(resp.messages[0].id, "wamid.out.1");
    }

    #[tokio::test]
    async fn approved_templates_filters_rejected() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/333444/message_templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"name": "appointment_reminder", "status": "APPROVED", "language": "pt_BR"},
                    {"name": "promo_blast", "status": "REJECTED", "language": "pt_BR"}
                ]
            })))
            .mount(&server)
            .await;

        let templates = client(&server.uri()).approved_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "appointment_reminder");
    }

    #[tokio::test]
    async fn graph_error_message_is_surfaced() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/111222/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "(#132001) Template name does not exist"}
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .send_template("5511988887777", "missing_template", "pt_BR", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("132001"));
    }
}
