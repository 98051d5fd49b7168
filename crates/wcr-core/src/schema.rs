use std::{collections::HashMap, sync::Arc};

use apache_avro::Schema;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    errors::Error,
    ports::SchemaFetcher,
    Result,
};

/// A topic's compiled binary decoder.
///
/// One per topic for the process lifetime; never invalidated. A schema
/// change upstream requires a process restart (documented limitation).
#[derive(Clone, Debug)]
pub struct CompiledSchema {
    pub id: String,
    pub schema: Schema,
}

/// Fetches and compiles topic schemas, caching by topic name (no TTL).
pub struct SchemaResolver {
    fetcher: Arc<dyn SchemaFetcher>,
    cache: Mutex<HashMap<String, Arc<CompiledSchema>>>,
}

impl SchemaResolver {
    pub fn new(fetcher: Arc<dyn SchemaFetcher>) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, topic_name: &str) -> Result<Arc<CompiledSchema>> {
        let mut cache = self.cache.lock().await;
        if let Some(compiled) = cache.get(topic_name) {
            return Ok(Arc::clone(compiled));
        }

        let fetched = self.fetcher.fetch_schema(topic_name).await?;
        let schema = Schema::parse_str(&fetched.json)
            .map_err(|e| Error::SchemaFetch(format!("schema compile for {topic_name}: {e}")))?;

        info!(topic = topic_name, schema_id = %fetched.id, "topic schema loaded");

        let compiled = Arc::new(CompiledSchema {
            id: fetched.id,
            schema,
        });
        cache.insert(topic_name.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }
}
