//! Inbound control protocol.
//!
//! Clients post one of three commands, either as a tagged object
//! (`{"type": "SKIP_WAITING"}`) or as a bare JSON string
//! (`"retry-requests"`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MessageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Take control of open clients now, if that is safe.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Copy current snapshot content into outdated snapshots.
    #[serde(rename = "PREPARE_CACHES_FOR_UPDATE")]
    PrepareCachesForUpdate,
    /// Replay the request queue now.
    #[serde(rename = "retry-requests")]
    RetryRequests,
}

#[derive(Deserialize)]
struct Tagged {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Bare(String),
    Tagged(Tagged),
}

impl ControlMessage {
    pub const ALL: [Self; 3] = [
        Self::SkipWaiting,
        Self::PrepareCachesForUpdate,
        Self::RetryRequests,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "SKIP_WAITING",
            Self::PrepareCachesForUpdate => "PREPARE_CACHES_FOR_UPDATE",
            Self::RetryRequests => "retry-requests",
        }
    }

    /// Look up a message by wire name. Names are case-sensitive.
    pub fn from_tag(tag: &str) -> Result<Self, MessageError> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == tag)
            .ok_or_else(|| MessageError::Unknown(String::from(tag)))
    }

    /// Decode a posted payload.
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|e| MessageError::Malformed(e.to_string()))?;
        match envelope {
            Envelope::Bare(tag) => Self::from_tag(&tag),
            Envelope::Tagged(Tagged { kind }) => Self::from_tag(&kind),
        }
    }

    /// Encode in the tagged object form.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "type": self.as_str() }).to_string()
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
