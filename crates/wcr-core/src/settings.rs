use std::sync::RwLock;

use crate::config::Config;

/// The single routing target this process forwards matching events for,
/// plus the field names the routing engine reads from decoded events.
///
/// Mutable process-wide, last-write-wins. The pipeline never holds a
/// reference into the store: it takes a [`SettingsStore::snapshot`] per
/// event, so a concurrent admin write affects the next event, never a
/// half-applied routing decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingSettings {
    pub channel_address_id: String,
    pub recipient_id: String,
    pub authorization_context: String,
    pub channel_field: String,
    pub payload_field: String,
    pub recipient_field: String,
    pub type_field: String,
}

impl RoutingSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            channel_address_id: cfg.channel_address_id.clone(),
            recipient_id: cfg.recipient_id.clone(),
            authorization_context: cfg.authorization_context.clone(),
            channel_field: cfg.channel_field.clone(),
            payload_field: cfg.payload_field.clone(),
            recipient_field: cfg.recipient_field.clone(),
            type_field: cfg.type_field.clone(),
        }
    }
}

/// Guarded shared settings with copy-on-read semantics.
pub struct SettingsStore {
    inner: RwLock<RoutingSettings>,
}

impl SettingsStore {
    pub fn new(initial: RoutingSettings) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    /// Atomic snapshot for one routing decision.
    pub fn snapshot(&self) -> RoutingSettings {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut RoutingSettings)) {
        let mut guard = self.inner.write().expect("settings lock poisoned");
        f(&mut guard);
    }

    /// Keyed read for the admin surface.
    pub fn get(&self, key: &str) -> Option<String> {
        let s = self.snapshot();
        let val = match key {
            "channelAddressId" => s.channel_address_id,
            "recipientId" => s.recipient_id,
            "authorizationContext" => s.authorization_context,
            "channelField" => s.channel_field,
            "payloadField" => s.payload_field,
            "recipientField" => s.recipient_field,
            "typeField" => s.type_field,
            _ => return None,
        };
        Some(val)
    }

    /// Keyed write for the admin surface. Returns false for unknown keys.
    pub fn set(&self, key: &str, value: String) -> bool {
        let mut guard = self.inner.write().expect("settings lock poisoned");
        match key {
            "channelAddressId" => guard.channel_address_id = value,
            "recipientId" => guard.recipient_id = value,
            "authorizationContext" => guard.authorization_context = value,
            "channelField" => guard.channel_field = value,
            "payloadField" => guard.payload_field = value,
            "recipientField" => guard.recipient_field = value,
            "typeField" => guard.type_field = value,
            _ => return false,
        }
        true
    }
}
