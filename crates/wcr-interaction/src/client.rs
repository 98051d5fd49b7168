//! Outbound interaction delivery to the messaging platform REST API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use wcr_core::{
    config::Config,
    errors::Error,
    ports::{AccessTokenProvider, AttachmentUpload, InboundInteraction, InteractionSender, TypingIndicator},
    settings::SettingsStore,
    Result,
};

const INTERACTIONS_PATH: &str = "/api/v1/interactions";

/// REST client for the platform interaction endpoint.
///
/// The routing target (conversation address, end-user client identifier,
/// authorization context) is read from the live settings store per send,
/// so admin updates apply to the next outbound interaction.
pub struct InteractionClient {
    http: reqwest::Client,
    api_url: String,
    org_id: String,
    auth: Arc<dyn AccessTokenProvider>,
    settings: Arc<SettingsStore>,
}

impl InteractionClient {
    pub fn new(
        api_url: impl Into<String>,
        org_id: impl Into<String>,
        auth: Arc<dyn AccessTokenProvider>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            org_id: org_id.into(),
            auth,
            settings,
        }
    }

    pub fn from_config(
        cfg: &Config,
        auth: Arc<dyn AccessTokenProvider>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self::new(cfg.interaction_api_url.clone(), cfg.org_id.clone(), auth, settings)
    }

    async fn post_interaction(
        &self,
        payload: Value,
        attachment: Option<&AttachmentUpload>,
    ) -> Result<reqwest::Response> {
        let token = self.auth.access_token(false).await?;
        let authorization_context = self
            .settings
            .get("authorizationContext")
            .unwrap_or_default();

        let mut form = reqwest::multipart::Form::new().part(
            "json",
            reqwest::multipart::Part::text(payload.to_string())
                .mime_str("application/json")
                .map_err(|e| Error::External(format!("interaction multipart: {e}")))?,
        );

        if let Some(upload) = attachment {
            form = form.part(
                "attachments",
                reqwest::multipart::Part::bytes(upload.bytes.clone())
                    .file_name(upload.file_name.clone()),
            );
        }

        self.http
            .post(format!("{}{INTERACTIONS_PATH}", self.api_url))
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .header("OrgId", &self.org_id)
            .header("AuthorizationContext", authorization_context)
            .header("RequestId", Uuid::new_v4().to_string())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("interaction request: {e}")))
    }

    async fn send_message(
        &self,
        text: &str,
        attachment: Option<AttachmentUpload>,
    ) -> Result<Value> {
        // Clear any typing indicator before the message lands; best-effort.
        if let Err(e) = self.send_typing(TypingIndicator::Stopped).await {
            warn!(error = %e, "typing-stop before message failed");
        }

        let target = self.target();
        let entry_id = Uuid::new_v4().to_string();
        let (payload, interaction_type) = match &attachment {
            None => (
                text_message_payload(&entry_id, &target, text),
                "EntryInteraction",
            ),
            Some(upload) => (
                attachment_message_payload(&entry_id, &target, text, upload.bytes.len()),
                "AttachmentInteraction",
            ),
        };

        let resp = self.post_interaction(payload, attachment.as_ref()).await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            info!(interaction_type, entry_id = %entry_id, "inbound interaction delivered");
            return Ok(body);
        }

        // Report the failed entry back to the platform with its error code.
        let error_code = body
            .get("code")
            .map(|c| c.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| status.as_u16().to_string());
        if let Err(e) = self.send_delivery_failed(&entry_id, &error_code).await {
            warn!(error = %e, "delivery-failed interaction could not be sent");
        }

        Err(Error::External(format!(
            "inbound {interaction_type} failed: {status} code={error_code}"
        )))
    }

    async fn send_typing(&self, indicator: TypingIndicator) -> Result<Value> {
        let entry_type = match indicator {
            TypingIndicator::Started => "TypingStartedIndicator",
            TypingIndicator::Stopped => "TypingStoppedIndicator",
        };
        let payload = typing_indicator_payload(&self.target(), entry_type);
        let resp = self.post_interaction(payload, None).await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Error::External(format!(
                "typing indicator {entry_type} failed: {status}"
            )));
        }
        Ok(body)
    }

    async fn send_delivery_failed(&self, entry_id: &str, error_code: &str) -> Result<Value> {
        let payload = delivery_failed_payload(&self.target(), entry_id, error_code);
        let resp = self.post_interaction(payload, None).await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Error::External(format!(
                "delivery-failed interaction rejected: {status}"
            )));
        }
        Ok(body)
    }

    fn target(&self) -> Target {
        let s = self.settings.snapshot();
        Target {
            conversation_address: s.channel_address_id,
            end_user_client: s.recipient_id,
        }
    }
}

/// The (to, from) pair every interaction payload carries.
struct Target {
    conversation_address: String,
    end_user_client: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn text_message_payload(entry_id: &str, target: &Target, text: &str) -> Value {
    json!({
        "to": target.conversation_address,
        "from": target.end_user_client,
        "interactions": [{
            "timestamp": now_millis(),
            "interactionType": "EntryInteraction",
            "payload": {
                "id": entry_id,
                "entryType": "Message",
                "abstractMessage": {
                    "messageType": "StaticContentMessage",
                    "id": entry_id,
                    "staticContent": {
                        "formatType": "Text",
                        "text": text
                    }
                }
            }
        }]
    })
}

fn attachment_message_payload(
    entry_id: &str,
    target: &Target,
    text: &str,
    content_length: usize,
) -> Value {
    json!({
        "to": target.conversation_address,
        "from": target.end_user_client,
        "interactions": [{
            "timestamp": now_millis(),
            "interactionType": "AttachmentInteraction",
            "id": entry_id,
            "attachmentIndex": 0,
            "contentLength": content_length,
            "text": text
        }]
    })
}

fn typing_indicator_payload(target: &Target, entry_type: &str) -> Value {
    json!({
        "to": target.conversation_address,
        "from": target.end_user_client,
        "interactions": [{
            "timestamp": now_millis(),
            "interactionType": "EntryInteraction",
            "payload": {
                "id": Uuid::new_v4().to_string(),
                "entryType": entry_type,
                "timestamp": now_millis()
            }
        }]
    })
}

fn delivery_failed_payload(target: &Target, failed_entry_id: &str, error_code: &str) -> Value {
    json!({
        "to": target.conversation_address,
        "from": target.end_user_client,
        "interactions": [{
            "timestamp": now_millis(),
            "interactionType": "EntryInteraction",
            "payload": {
                "id": Uuid::new_v4().to_string(),
                "failedConversationEntryIdentifier": failed_entry_id,
                "entryType": "MessageDeliveryFailed",
                "recipient": {
                    "appType": "11",
                    "subject": target.end_user_client,
                    "role": "4"
                },
                "errorCode": error_code
            }
        }]
    })
}

#[async_trait]
impl InteractionSender for InteractionClient {
    async fn send(&self, interaction: InboundInteraction) -> Result<Value> {
        match interaction {
            InboundInteraction::Message { text, attachment } => {
                self.send_message(&text, attachment).await
            }
            InboundInteraction::Typing(indicator) => self.send_typing(indicator).await,
            InboundInteraction::DeliveryFailed {
                entry_id,
                error_code,
            } => self.send_delivery_failed(&entry_id, &error_code).await,
        }
    }
}
