use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{decode::RawEvent, Result};

/// Port for the platform OAuth collaborator.
///
/// Implementations cache the token; `force_refresh` drops the cache and
/// obtains a fresh one.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self, force_refresh: bool) -> Result<String>;
}

/// A topic's schema as fetched from the bus, before compilation.
#[derive(Clone, Debug)]
pub struct FetchedSchema {
    pub id: String,
    pub json: String,
}

/// Port for the two-step topic → schema lookup.
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch_schema(&self, topic_name: &str) -> Result<FetchedSchema>;
}

/// One inbound batch message from the subscription stream.
///
/// An empty `events` list is a liveness-only cursor advance.
#[derive(Clone, Debug, Default)]
pub struct EventBatch {
    pub events: Vec<RawEvent>,
    pub latest_replay_cursor: Vec<u8>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventBatch>> + Send>>;

/// Port for the long-lived bidirectional subscription.
///
/// `subscribe` sends the initial request (topic + requested event count)
/// and returns the inbound batch stream. A transport error item is
/// terminal for that stream instance.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    async fn subscribe(&self, topic_name: &str, num_requested: i32) -> Result<EventStream>;
}

/// File content attached to an outbound message.
#[derive(Clone, Debug)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingIndicator {
    Started,
    Stopped,
}

/// The outbound interaction kinds the platform accepts from this relay.
#[derive(Clone, Debug)]
pub enum InboundInteraction {
    Message {
        text: String,
        attachment: Option<AttachmentUpload>,
    },
    Typing(TypingIndicator),
    DeliveryFailed {
        entry_id: String,
        error_code: String,
    },
}

/// Port for outbound delivery to the messaging platform.
#[async_trait]
pub trait InteractionSender: Send + Sync {
    async fn send(&self, interaction: InboundInteraction) -> Result<serde_json::Value>;
}
