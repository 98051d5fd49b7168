use std::sync::Arc;

use wcr_core::{
    config::Config,
    ports::{AccessTokenProvider, InteractionSender, SchemaFetcher, SubscriptionTransport},
    queue::DeliveryQueue,
    schema::SchemaResolver,
    settings::{RoutingSettings, SettingsStore},
    subscription::SubscriptionManager,
};
use wcr_interaction::{BearerTokenProvider, InteractionClient};
use wcr_pubsub::PubSubTransport;

#[tokio::main]
async fn main() -> Result<(), wcr_core::Error> {
    wcr_core::logging::init("wcr")?;

    let cfg = Arc::new(Config::load()?);
    let settings = Arc::new(SettingsStore::new(RoutingSettings::from_config(&cfg)));

    let auth: Arc<dyn AccessTokenProvider> = Arc::new(BearerTokenProvider::from_config(&cfg));
    let interactions: Arc<dyn InteractionSender> = Arc::new(InteractionClient::from_config(
        &cfg,
        auth.clone(),
        settings.clone(),
    ));

    // Drain runs from process start: records popped with no client
    // attached are dropped, never replayed to a late connection.
    let queue = DeliveryQueue::new(cfg.reply_drain_interval);
    queue.start();

    let transport = Arc::new(
        PubSubTransport::connect(
            &cfg.pubsub_endpoint,
            cfg.instance_url.clone(),
            cfg.org_id.clone(),
            auth.clone(),
        )
        .await?,
    );
    let fetcher: Arc<dyn SchemaFetcher> = transport.clone();
    let stream_transport: Arc<dyn SubscriptionTransport> = transport;

    let subscription = Arc::new(SubscriptionManager::new(
        stream_transport,
        SchemaResolver::new(fetcher),
        settings.clone(),
        queue.clone(),
        cfg.topic_name.clone(),
        cfg.event_receive_limit,
    ));
    subscription.respawn();

    let state = wcr_web::AppState {
        settings,
        queue,
        auth,
        interactions,
        subscription,
    };

    wcr_web::serve(state, cfg.port)
        .await
        .map_err(|e| wcr_core::Error::External(format!("web server failed: {e}")))?;

    Ok(())
}
