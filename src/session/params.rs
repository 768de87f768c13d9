//! Aufrufparameter einer Call-Session
//!
//! Kommen aus dem Navigationskontext (`?channel=..&token=..&appId=..&uid=..`).
//! App-ID und Token bilden den Relay-Zugang: beide gesetzt wählt den
//! Relay-Pfad, beide leer den Peer-Pfad, alles dazwischen ist ungültig.

use super::call::CallError;
use serde::{Deserialize, Serialize};

/// Rohe Parameter, wie sie aus der Navigation kommen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParameters {
    pub room: Option<String>,
    pub app_id: Option<String>,
    pub token: Option<String>,
    pub participant: Option<String>,
}

impl CallParameters {
    /// Peer-Pfad ohne Relay-Zugang
    pub fn peer(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Default::default()
        }
    }

    /// Relay-Pfad mit vollständigem Zugang
    pub fn relay(
        room: impl Into<String>,
        app_id: impl Into<String>,
        token: impl Into<String>,
        participant: impl Into<String>,
    ) -> Self {
        Self {
            room: Some(room.into()),
            app_id: Some(app_id.into()),
            token: Some(token.into()),
            participant: Some(participant.into()),
        }
    }

    /// Liest `channel` (oder `room`), `appId`, `token` und `uid` aus einem Query-String
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        let query = query.trim_start_matches('?');

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "channel" | "room" => params.room = value,
                "appId" => params.app_id = value,
                "token" => params.token = value,
                "uid" => params.participant = value,
                _ => {}
            }
        }

        params
    }

    /// Prüft die Parameter und wählt den Transportweg
    pub fn validate(&self) -> Result<ValidatedCall, CallError> {
        let room = present(&self.room)
            .ok_or_else(|| CallError::InvalidParameters("room identifier is missing".into()))?;
        let participant = present(&self.participant);

        let route = match (present(&self.app_id), present(&self.token)) {
            (Some(app_id), Some(token)) => {
                let uid = participant.clone().ok_or_else(|| {
                    CallError::InvalidParameters(
                        "relay credentials require a participant id".into(),
                    )
                })?;
                CallRoute::ManagedRelay(RelayCredential { app_id, token, uid })
            }
            (None, None) => CallRoute::PeerSignaling,
            (Some(_), None) => {
                return Err(CallError::InvalidParameters(
                    "relay credentials are missing the token".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(CallError::InvalidParameters(
                    "relay credentials are missing the app id".into(),
                ))
            }
        };

        Ok(ValidatedCall {
            room,
            participant: participant.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            route,
        })
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

// ============================================================================
// VALIDATED
// ============================================================================

/// Zugang zum Relay-Dienst
#[derive(Clone, PartialEq, Eq)]
pub struct RelayCredential {
    pub app_id: String,
    pub token: String,
    pub uid: String,
}

impl std::fmt::Debug for RelayCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCredential")
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .field("uid", &self.uid)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRoute {
    ManagedRelay(RelayCredential),
    PeerSignaling,
}

/// Geprüfte, unveränderliche Parameter einer Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCall {
    pub room: String,
    pub participant: String,
    pub route: CallRoute,
}
