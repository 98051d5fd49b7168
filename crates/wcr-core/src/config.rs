use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for the relay process.
///
/// Everything comes from the environment (a local `.env` is honored but
/// never overrides already-set variables). Field-name and routing-target
/// values only seed the settings store; the admin endpoints mutate the
/// live copies at runtime.
#[derive(Clone, Debug)]
pub struct Config {
    // Web surface
    pub port: u16,

    // Event bus
    pub pubsub_endpoint: String,
    pub topic_name: String,
    pub event_receive_limit: i32,
    pub instance_url: String,
    pub org_id: String,

    // OAuth JWT bearer flow
    pub auth_endpoint: String,
    pub consumer_key: String,
    pub private_key_pem: String,
    pub jwt_audience: String,
    pub jwt_subject: String,

    // Interaction REST API
    pub interaction_api_url: String,

    // Routing target + custom event field names (settings-store seed)
    pub authorization_context: String,
    pub channel_address_id: String,
    pub recipient_id: String,
    pub channel_field: String,
    pub payload_field: String,
    pub recipient_field: String,
    pub type_field: String,

    // Reply delivery
    pub reply_drain_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let port = env_u64("PORT").unwrap_or(3000) as u16;

        let pubsub_endpoint = require("PUBSUB_ENDPOINT")?;
        let topic_name = require("PUBSUB_TOPIC_NAME")?;
        let event_receive_limit = env_u64("PUBSUB_EVENT_RECEIVE_LIMIT").unwrap_or(100) as i32;
        let instance_url = require("INSTANCE_URL")?;
        let org_id = require("ORG_ID")?;

        let auth_endpoint = require("AUTH_ENDPOINT")?;
        let consumer_key = require("AUTH_CONSUMER_KEY")?;
        // Keys pasted into env files usually carry literal `\n` sequences.
        let private_key_pem = require("AUTH_PRIVATE_KEY")?.replace("\\n", "\n");
        let jwt_audience = require("AUTH_JWT_AUDIENCE")?;
        let jwt_subject = require("AUTH_JWT_SUBJECT")?;

        let interaction_api_url = require("INTERACTION_API_URL")?;

        let authorization_context = env_str("AUTHORIZATION_CONTEXT").unwrap_or_default();
        let channel_address_id = env_str("CHANNEL_ADDRESS_ID").unwrap_or_default();
        let recipient_id = env_str("RECIPIENT_ID").unwrap_or_default();

        let channel_field = env_str("EVENT_CHANNEL_FIELD")
            .and_then(non_empty)
            .unwrap_or_else(|| "channelAddressIdentifier".to_string());
        let payload_field = env_str("EVENT_PAYLOAD_FIELD")
            .and_then(non_empty)
            .unwrap_or_else(|| "payload".to_string());
        let recipient_field = env_str("EVENT_RECIPIENT_FIELD")
            .and_then(non_empty)
            .unwrap_or_else(|| "recipient".to_string());
        let type_field = env_str("EVENT_TYPE_FIELD")
            .and_then(non_empty)
            .unwrap_or_else(|| "type".to_string());

        let reply_drain_interval =
            Duration::from_millis(env_u64("REPLY_DRAIN_INTERVAL_MS").unwrap_or(1000));

        Ok(Self {
            port,
            pubsub_endpoint,
            topic_name,
            event_receive_limit,
            instance_url,
            org_id,
            auth_endpoint,
            consumer_key,
            private_key_pem,
            jwt_audience,
            jwt_subject,
            interaction_api_url,
            authorization_context,
            channel_address_id,
            recipient_id,
            channel_field,
            payload_field,
            recipient_field,
            type_field,
            reply_drain_interval,
        })
    }
}

fn require(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
