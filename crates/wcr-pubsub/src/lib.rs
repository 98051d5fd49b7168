//! gRPC event-bus adapter.
//!
//! Implements the `wcr-core` `SchemaFetcher` and `SubscriptionTransport`
//! ports over the bus's Pub/Sub gRPC API (see `eventbus.proto`). Every
//! call carries `accesstoken` / `instanceurl` / `tenantid` metadata minted
//! from the auth port.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::info;

use wcr_core::{
    decode::RawEvent,
    errors::Error,
    ports::{
        AccessTokenProvider, EventBatch, EventStream, FetchedSchema, SchemaFetcher,
        SubscriptionTransport,
    },
    Result,
};

pub mod proto;

use proto::{pub_sub_client::PubSubClient, FetchRequest, FetchResponse, SchemaRequest, TopicRequest};

pub struct PubSubTransport {
    client: PubSubClient<Channel>,
    auth: Arc<dyn AccessTokenProvider>,
    instance_url: String,
    tenant_id: String,
}

impl PubSubTransport {
    /// Open the TLS channel to the bus endpoint. The connection is lazy on
    /// the tonic side but endpoint/TLS misconfiguration fails here.
    pub async fn connect(
        endpoint: &str,
        instance_url: impl Into<String>,
        tenant_id: impl Into<String>,
        auth: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self> {
        let tls = ClientTlsConfig::new().with_native_roots();
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::Config(format!("invalid pub/sub endpoint: {e}")))?
            .tls_config(tls)
            .map_err(|e| Error::Config(format!("pub/sub tls config: {e}")))?
            .connect()
            .await
            .map_err(|e| Error::StreamTransport(format!("pub/sub connect: {e}")))?;

        info!(endpoint, "pub/sub client connected");

        Ok(Self {
            client: PubSubClient::new(channel),
            auth,
            instance_url: instance_url.into(),
            tenant_id: tenant_id.into(),
        })
    }

    async fn authed<T>(&self, message: T) -> Result<tonic::Request<T>> {
        let token = self.auth.access_token(false).await?;

        let mut request = tonic::Request::new(message);
        let meta = request.metadata_mut();
        meta.insert("accesstoken", ascii_value(&token)?);
        meta.insert("instanceurl", ascii_value(&self.instance_url)?);
        meta.insert("tenantid", ascii_value(&self.tenant_id)?);
        Ok(request)
    }
}

fn ascii_value(v: &str) -> Result<MetadataValue<Ascii>> {
    v.parse()
        .map_err(|_| Error::Auth("metadata value is not valid ascii".to_string()))
}

fn batch_from_fetch(fetch: FetchResponse) -> EventBatch {
    EventBatch {
        events: fetch
            .events
            .into_iter()
            .filter_map(|consumer| {
                consumer.event.map(|payload| RawEvent {
                    replay_cursor: consumer.replay_id,
                    payload: payload.payload,
                })
            })
            .collect(),
        latest_replay_cursor: fetch.latest_replay_id,
    }
}

#[async_trait]
impl SchemaFetcher for PubSubTransport {
    async fn fetch_schema(&self, topic_name: &str) -> Result<FetchedSchema> {
        let mut client = self.client.clone();

        let request = self
            .authed(TopicRequest {
                topic_name: topic_name.to_string(),
            })
            .await?;
        let topic = client
            .get_topic(request)
            .await
            .map_err(|s| Error::SchemaFetch(format!("topic lookup for {topic_name}: {s}")))?
            .into_inner();

        let request = self
            .authed(SchemaRequest {
                schema_id: topic.schema_id.clone(),
            })
            .await?;
        let schema = client
            .get_schema(request)
            .await
            .map_err(|s| Error::SchemaFetch(format!("schema lookup {}: {s}", topic.schema_id)))?
            .into_inner();

        Ok(FetchedSchema {
            id: schema.schema_id,
            json: schema.schema_json,
        })
    }
}

#[async_trait]
impl SubscriptionTransport for PubSubTransport {
    async fn subscribe(&self, topic_name: &str, num_requested: i32) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel::<FetchRequest>(4);
        tx.send(FetchRequest {
            topic_name: topic_name.to_string(),
            num_requested,
        })
        .await
        .map_err(|_| Error::StreamTransport("subscribe request channel closed".to_string()))?;

        let mut client = self.client.clone();
        let request = self.authed(ReceiverStream::new(rx)).await?;
        let response = client
            .subscribe(request)
            .await
            .map_err(|s| Error::StreamTransport(format!("subscribe: {s}")))?;
        let mut inbound = response.into_inner();

        let stream = try_stream! {
            // The request side must stay open for the lifetime of the
            // stream; dropping it half-closes the subscription.
            let _request_tx = tx;
            loop {
                let message = inbound
                    .message()
                    .await
                    .map_err(|s| Error::StreamTransport(format!("stream receive: {s}")))?;
                let Some(fetch) = message else { break };
                yield batch_from_fetch(fetch);
            }
        };

        Ok(Box::pin(stream))
    }
}
