//! Web surface of the relay: the SSE push channel to the browser plus the
//! admin endpoints (settings, outbound send, token refresh, operator
//! re-subscribe).

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use wcr_core::{
    errors::Error,
    ports::{AccessTokenProvider, AttachmentUpload, InboundInteraction, InteractionSender, TypingIndicator},
    queue::DeliveryQueue,
    settings::SettingsStore,
    subscription::SubscriptionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub queue: Arc<DeliveryQueue>,
    pub auth: Arc<dyn AccessTokenProvider>,
    pub interactions: Arc<dyn InteractionSender>,
    pub subscription: Arc<SubscriptionManager>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/replymessage", get(reply_message))
        .route("/getsettings", get(get_settings))
        .route("/sendsettings", post(send_settings))
        .route("/sendmessage", post(send_message))
        .route("/refresh-access-token", get(refresh_access_token))
        .route("/subscribe", get(subscribe))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "web server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Errors surfaced to HTTP clients. Pipeline-internal taxonomy maps onto
/// a small set of status codes; bodies carry the display message.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Config(_) | Error::Decode(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, self.0.to_string()).into_response()
    }
}

// ── Push channel ─────────────────────────────────────────────────────────

/// One long-lived event stream per connection; attaching rebinds the
/// delivery queue's drain loop to this connection (the previous one, if
/// any, is cancelled).
async fn reply_message(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.queue.attach(tx);

    let stream = UnboundedReceiverStream::new(rx).enumerate().map(|(i, record)| {
        let data = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default()
            .event("replymsg")
            .id((i + 1).to_string())
            .data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Settings admin ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
struct SettingsDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_address_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_field: Option<String>,
}

async fn get_settings(State(state): State<AppState>) -> Json<SettingsDto> {
    let s = state.settings.snapshot();
    Json(SettingsDto {
        channel_address_id: Some(s.channel_address_id),
        recipient_id: Some(s.recipient_id),
        authorization_context: Some(s.authorization_context),
        channel_field: Some(s.channel_field),
        payload_field: Some(s.payload_field),
        recipient_field: Some(s.recipient_field),
        type_field: Some(s.type_field),
    })
}

/// Last-write-wins; only keys present in the body are touched. Takes
/// effect on the next routed event, not retroactively.
async fn send_settings(
    State(state): State<AppState>,
    Json(dto): Json<SettingsDto>,
) -> StatusCode {
    state.settings.update(|s| {
        if let Some(v) = dto.channel_address_id {
            s.channel_address_id = v;
        }
        if let Some(v) = dto.recipient_id {
            s.recipient_id = v;
        }
        if let Some(v) = dto.authorization_context {
            s.authorization_context = v;
        }
        if let Some(v) = dto.channel_field {
            s.channel_field = v;
        }
        if let Some(v) = dto.payload_field {
            s.payload_field = v;
        }
        if let Some(v) = dto.recipient_field {
            s.recipient_field = v;
        }
        if let Some(v) = dto.type_field {
            s.type_field = v;
        }
    });
    StatusCode::NO_CONTENT
}

// ── Outbound send ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SendMessageForm {
    interaction_type: String,
    entry_type: String,
    message: String,
    attachment: Option<AttachmentUpload>,
}

async fn read_send_message_form(mut multipart: Multipart) -> Result<SendMessageForm, ApiError> {
    let mut form = SendMessageForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(Error::External(format!("multipart read: {e}"))))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "interactionType" => {
                form.interaction_type = field
                    .text()
                    .await
                    .map_err(|e| ApiError(Error::External(format!("multipart field: {e}"))))?;
            }
            "entryType" => {
                form.entry_type = field
                    .text()
                    .await
                    .map_err(|e| ApiError(Error::External(format!("multipart field: {e}"))))?;
            }
            "message" => {
                form.message = field
                    .text()
                    .await
                    .map_err(|e| ApiError(Error::External(format!("multipart field: {e}"))))?;
            }
            "attachment" => {
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(Error::External(format!("multipart file: {e}"))))?;
                form.attachment = Some(AttachmentUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn send_message(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let form = read_send_message_form(multipart).await?;

    let interaction = match (form.interaction_type.as_str(), form.entry_type.as_str()) {
        ("AttachmentInteraction", _) | ("EntryInteraction", "Message") => {
            InboundInteraction::Message {
                text: form.message,
                attachment: form.attachment,
            }
        }
        ("EntryInteraction", "TypingStartedIndicator") => {
            InboundInteraction::Typing(TypingIndicator::Started)
        }
        (interaction_type, entry_type) => {
            return Err(ApiError(Error::Config(format!(
                "unsupported interaction: {interaction_type}/{entry_type}"
            ))));
        }
    };

    let result = state.interactions.send(interaction).await?;
    Ok(Json(result))
}

// ── Operator actions ─────────────────────────────────────────────────────

async fn refresh_access_token(State(state): State<AppState>) -> Result<String, ApiError> {
    let token = state.auth.access_token(true).await?;
    Ok(token)
}

/// Explicit (re-)subscribe. Also the recovery path after the stream ends
/// or errors: there is no automatic reconnect.
async fn subscribe(State(state): State<AppState>) -> &'static str {
    state.subscription.respawn();
    "Subscribed to the interaction event."
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use wcr_core::{
        ports::{EventBatch, EventStream, FetchedSchema, SchemaFetcher, SubscriptionTransport},
        route::ReplyRecord,
        schema::SchemaResolver,
        settings::RoutingSettings,
        Result as CoreResult,
    };

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self, _force_refresh: bool) -> CoreResult<String> {
            Ok("fresh-token".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: std::sync::Mutex<Vec<InboundInteraction>>,
    }

    #[async_trait]
    impl InteractionSender for RecordingSender {
        async fn send(&self, interaction: InboundInteraction) -> CoreResult<serde_json::Value> {
            self.sent.lock().unwrap().push(interaction);
            Ok(serde_json::json!({"status": "ok"}))
        }
    }

    struct EmptyTransport;

    #[async_trait]
    impl SubscriptionTransport for EmptyTransport {
        async fn subscribe(&self, _topic: &str, _n: i32) -> CoreResult<EventStream> {
            Ok(Box::pin(futures::stream::empty::<CoreResult<EventBatch>>()))
        }
    }

    struct StaticSchema;

    #[async_trait]
    impl SchemaFetcher for StaticSchema {
        async fn fetch_schema(&self, _topic: &str) -> CoreResult<FetchedSchema> {
            Ok(FetchedSchema {
                id: "s1".to_string(),
                json: r#"{"type": "record", "name": "E", "fields": []}"#.to_string(),
            })
        }
    }

    fn test_state() -> (AppState, Arc<RecordingSender>) {
        let settings = Arc::new(SettingsStore::new(RoutingSettings {
            channel_address_id: "chan-1".to_string(),
            recipient_id: "alice".to_string(),
            authorization_context: "ctx".to_string(),
            channel_field: "channelAddressIdentifier".to_string(),
            payload_field: "payload".to_string(),
            recipient_field: "recipient".to_string(),
            type_field: "type".to_string(),
        }));
        let queue = DeliveryQueue::new(Duration::from_millis(20));
        let sender = Arc::new(RecordingSender::default());
        let fetcher: Arc<dyn SchemaFetcher> = Arc::new(StaticSchema);
        let subscription = Arc::new(SubscriptionManager::new(
            Arc::new(EmptyTransport),
            SchemaResolver::new(fetcher),
            settings.clone(),
            queue.clone(),
            "/event/Reply__e",
            10,
        ));

        let state = AppState {
            settings,
            queue,
            auth: Arc::new(StaticToken),
            interactions: sender.clone(),
            subscription,
        };
        (state, sender)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let (state, _) = test_state();
        let app = build_router(state);

        let update = Request::builder()
            .method("POST")
            .uri("/sendsettings")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"recipientId": "bob", "typeField": "kind"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(update).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let get = Request::builder()
            .uri("/getsettings")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let v = body_json(response).await;
        assert_eq!(v["recipientId"], "bob");
        assert_eq!(v["typeField"], "kind");
        // Untouched keys keep their seeded values.
        assert_eq!(v["channelAddressId"], "chan-1");
    }

    #[tokio::test]
    async fn reply_message_is_an_event_stream() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/replymessage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }

    #[tokio::test]
    async fn attached_client_receives_drained_records_as_sse_events() {
        let (state, _) = test_state();
        let queue = state.queue.clone();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/replymessage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        queue.enqueue(ReplyRecord {
            channel_address_id: "chan-1".to_string(),
            message_text: "hello".to_string(),
            attachment_name: None,
            attachment_url: None,
            recipient_id: "alice".to_string(),
        });

        let mut body = response.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("sse frame before timeout")
            .expect("stream still open")
            .expect("frame read");

        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: replymsg"));
        assert!(text.contains("\"replyMessageText\":\"hello\""));
        assert!(text.contains("id: 1"));
    }

    #[tokio::test]
    async fn send_message_maps_text_form_to_message_interaction() {
        let (state, sender) = test_state();
        let app = build_router(state);

        let boundary = "XTESTBOUNDARY";
        let body = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"interactionType\"\r\n\r\nEntryInteraction\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"entryType\"\r\n\r\nMessage\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"message\"\r\n\r\nhello out there\r\n--{boundary}--\r\n"
        );

        let request = Request::builder()
            .method("POST")
            .uri("/sendmessage")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let v = body_json(response).await;
        assert_eq!(v["status"], "ok");

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            InboundInteraction::Message { text, attachment } => {
                assert_eq!(text, "hello out there");
                assert!(attachment.is_none());
            }
            other => panic!("unexpected interaction: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_maps_typing_indicator() {
        let (state, sender) = test_state();
        let app = build_router(state);

        let boundary = "XTESTBOUNDARY";
        let body = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"interactionType\"\r\n\r\nEntryInteraction\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"entryType\"\r\n\r\nTypingStartedIndicator\r\n--{boundary}--\r\n"
        );

        let request = Request::builder()
            .method("POST")
            .uri("/sendmessage")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sent = sender.sent.lock().unwrap();
        assert!(matches!(
            sent[0],
            InboundInteraction::Typing(TypingIndicator::Started)
        ));
    }

    #[tokio::test]
    async fn unsupported_interaction_is_bad_request() {
        let (state, _) = test_state();
        let app = build_router(state);

        let boundary = "XTESTBOUNDARY";
        let body = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"interactionType\"\r\n\r\nEntryInteraction\r\n--{boundary}\r\ncontent-disposition: form-data; name=\"entryType\"\r\n\r\nSomethingElse\r\n--{boundary}--\r\n"
        );

        let request = Request::builder()
            .method("POST")
            .uri("/sendmessage")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_returns_a_fresh_token() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/refresh-access-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"fresh-token");
    }

    #[tokio::test]
    async fn subscribe_endpoint_spawns_the_stream() {
        let (state, _) = test_state();
        let subscription = state.subscription.clone();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        // The empty scripted stream ends immediately once the spawned run
        // drives it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            subscription.state(),
            wcr_core::subscription::StreamState::Ended
        );
    }
}
