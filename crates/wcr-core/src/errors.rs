/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the pipeline
/// can handle failures consistently (fatal vs. per-event skip). A routing
/// mismatch is deliberately NOT a variant: filtered-out events are a normal
/// outcome and surface as `None` from the routing engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Topic or schema lookup failed upstream; fatal to that topic's
    /// subscription attempt (no decoding is possible without a schema).
    #[error("schema fetch failed: {0}")]
    SchemaFetch(String),

    /// One event's bytes (or an embedded JSON string) did not conform.
    /// Per-event: the offending event is skipped, the stream continues.
    #[error("event decode failed: {0}")]
    Decode(String),

    /// Terminal for the current stream instance. Surfaced to the operator;
    /// re-subscribing is an explicit external action.
    #[error("stream transport error: {0}")]
    StreamTransport(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
