//! Konfiguration für Call-Sessions und den Rendezvous-Server
//!
//! Standardwerte entsprechen dem Betrieb gegen einen lokalen
//! Rendezvous-Server mit den öffentlichen Google STUN-Servern.
//! Umgebungsvariablen überschreiben einzelne Felder.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const ENV_SIGNALING_URL: &str = "PEER_CALL_SIGNALING_URL";
pub const ENV_STUN_URLS: &str = "PEER_CALL_STUN_URLS";
pub const ENV_TURN_URL: &str = "PEER_CALL_TURN_URL";
pub const ENV_TURN_USERNAME: &str = "PEER_CALL_TURN_USERNAME";
pub const ENV_TURN_CREDENTIAL: &str = "PEER_CALL_TURN_CREDENTIAL";
pub const ENV_BIND: &str = "PEER_CALL_BIND";

const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_BIND: &str = "0.0.0.0:8080";

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Ein STUN- oder TURN-Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Standard STUN Server (Google, kostenlos)
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: String::new(),
        credential: String::new(),
    }]
}

// ============================================================================
// SESSION CONFIG
// ============================================================================

/// Einstellungen einer CallSession
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket-Adresse des Rendezvous-Servers
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    /// Kapazität der broadcast-Kanäle für Events
    pub event_capacity: usize,
    /// Maximale Wartezeit beim Öffnen des Signaling-Kanals
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: default_ice_servers(),
            event_capacity: 100,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Standardwerte, überschrieben durch `PEER_CALL_*` Umgebungsvariablen
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Fügt einen TURN-Server hinzu
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
        self
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_SIGNALING_URL) {
            self.signaling_url = url;
        }

        if let Some(stun) = lookup(ENV_STUN_URLS) {
            let urls: Vec<String> = stun
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
            if !urls.is_empty() {
                self.ice_servers = vec![IceServerConfig {
                    urls,
                    username: String::new(),
                    credential: String::new(),
                }];
            }
        }

        if let Some(turn) = lookup(ENV_TURN_URL) {
            self = self.with_turn_server(
                turn,
                lookup(ENV_TURN_USERNAME).unwrap_or_default(),
                lookup(ENV_TURN_CREDENTIAL).unwrap_or_default(),
            );
        }

        self
    }
}

// ============================================================================
// RENDEZVOUS CONFIG
// ============================================================================

/// Einstellungen des Rendezvous-Servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousConfig {
    pub bind_addr: String,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
        }
    }
}

impl RendezvousConfig {
    pub fn from_env() -> Self {
        match std::env::var(ENV_BIND) {
            Ok(bind_addr) if !bind_addr.trim().is_empty() => Self { bind_addr },
            _ => Self::default(),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
