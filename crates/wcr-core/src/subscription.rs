use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    decode::{cursor_to_string, decode_event},
    ports::SubscriptionTransport,
    queue::DeliveryQueue,
    route::route_event,
    schema::SchemaResolver,
    settings::SettingsStore,
    Result,
};

/// Lifecycle of one subscription stream instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Subscribed,
    Receiving,
    /// Terminal: upstream closed the stream. No automatic reconnect;
    /// re-subscribing is an explicit operator action.
    Ended,
    /// Terminal: transport failure for this stream instance.
    Errored,
}

/// Owns the long-lived subscription: sends the subscribe request, feeds
/// each received batch through decode → route → enqueue, and tracks the
/// stream lifecycle.
pub struct SubscriptionManager {
    transport: Arc<dyn SubscriptionTransport>,
    resolver: SchemaResolver,
    settings: Arc<SettingsStore>,
    queue: Arc<DeliveryQueue>,
    topic_name: String,
    num_requested: i32,
    state: Mutex<StreamState>,
    current: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn SubscriptionTransport>,
        resolver: SchemaResolver,
        settings: Arc<SettingsStore>,
        queue: Arc<DeliveryQueue>,
        topic_name: impl Into<String>,
        num_requested: i32,
    ) -> Self {
        Self {
            transport,
            resolver,
            settings,
            queue,
            topic_name: topic_name.into(),
            num_requested,
            state: Mutex::new(StreamState::Idle),
            current: Mutex::new(None),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: StreamState) {
        *self.state.lock().expect("state lock poisoned") = next;
    }

    /// Tear down any live stream and start a fresh one in the background.
    ///
    /// This is the operator-triggered (re-)subscribe action; it is also
    /// the only reconnect mechanism after `Ended`/`Errored`.
    pub fn respawn(self: &Arc<Self>) {
        let mut slot = self.current.lock().expect("task lock poisoned");
        if let Some((token, handle)) = slot.take() {
            token.cancel();
            handle.abort();
        }

        let token = CancellationToken::new();
        let manager = Arc::clone(self);
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.run(run_token).await {
                error!(error = %e, "subscription stream failed");
            }
        });
        *slot = Some((token, handle));
    }

    /// Drive one stream instance to a terminal state.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.set_state(StreamState::Idle);

        // No schema, no decoding: a fetch failure is fatal to this attempt.
        let schema = self.resolver.resolve(&self.topic_name).await?;

        let mut stream = match self
            .transport
            .subscribe(&self.topic_name, self.num_requested)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.set_state(StreamState::Errored);
                return Err(e);
            }
        };
        self.set_state(StreamState::Subscribed);
        info!(
            topic = %self.topic_name,
            num_requested = self.num_requested,
            "subscribe request sent"
        );

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(StreamState::Ended);
                    info!(topic = %self.topic_name, "subscription torn down");
                    return Ok(());
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(batch)) => {
                    if batch.events.is_empty() {
                        // Liveness-only cursor advance.
                        trace!(topic = %self.topic_name, "liveness ping");
                        continue;
                    }

                    self.set_state(StreamState::Receiving);
                    let cursor = cursor_to_string(&batch.latest_replay_cursor)
                        .unwrap_or_else(|_| "<unknown>".to_string());
                    info!(
                        count = batch.events.len(),
                        latest_replay_cursor = %cursor,
                        "received event batch"
                    );

                    for raw in &batch.events {
                        match decode_event(&schema, raw) {
                            Ok(decoded) => {
                                // One settings snapshot per routing decision.
                                let snapshot = self.settings.snapshot();
                                if let Some(record) = route_event(&decoded, &snapshot) {
                                    debug!(
                                        replay_cursor = %decoded.replay_cursor,
                                        "reply record enqueued"
                                    );
                                    self.queue.enqueue(record);
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "skipping undecodable event");
                            }
                        }
                    }

                    self.set_state(StreamState::Subscribed);
                }
                Some(Err(e)) => {
                    self.set_state(StreamState::Errored);
                    error!(topic = %self.topic_name, error = %e, "stream transport error");
                    return Err(e);
                }
                None => {
                    self.set_state(StreamState::Ended);
                    info!(topic = %self.topic_name, "stream ended");
                    return Ok(());
                }
            }
        }
    }
}
