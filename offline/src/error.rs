use std::path::PathBuf;

use crate::lifecycle::WorkerState;

/// All errors produced by kpio-offline.
///
/// Variants are split into two categories:
/// - **Faults** from host services: storage, cache population, network.
///   The engine swallows most of these and reports them to diagnostics.
/// - **Usage errors**: bad configuration, malformed control messages,
///   lifecycle calls made in the wrong state.
#[derive(thiserror::Error, Debug)]
pub enum OfflineError {
    // ── Faults ───────────────────────────────────────────────────────

    #[error("storage fault: {0}")]
    Storage(#[from] StorageFault),

    #[error("cache population failed: {0}")]
    Populate(#[from] PopulateFault),

    #[error("cache storage error: {0}")]
    Cache(#[from] CacheError),

    #[error("network fault: {0}")]
    Network(#[from] NetworkFault),

    // ── Usage errors ─────────────────────────────────────────────────

    #[error("invalid lifecycle transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: WorkerState, to: WorkerState },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("control message error: {0}")]
    Message(#[from] MessageError),
}

impl OfflineError {
    /// Whether this error came from a host service rather than from the caller.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Populate(_) | Self::Cache(_) | Self::Network(_)
        )
    }
}

/// Durable request store failures.
#[derive(thiserror::Error, Debug)]
pub enum StorageFault {
    #[error("request store unavailable: {0}")]
    Unavailable(String),

    #[error("queued request {key} already exists")]
    AlreadyExists { key: u64 },

    #[error("request store corrupt at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to buffer request body: {0}")]
    Body(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Blob cache host failures.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache storage unavailable: {0}")]
    Unavailable(String),

    #[error("cache quota exceeded")]
    QuotaExceeded,
}

/// Bulk snapshot population failed; nothing from the call was written.
#[derive(thiserror::Error, Debug)]
pub enum PopulateFault {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetworkFault,
    },

    #[error("bad status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("bulk write failed: {0}")]
    Write(#[from] CacheError),
}

/// A fetch threw or produced no response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkFault {
    #[error("network unreachable: {0}")]
    Unreachable(String),

    #[error("no response produced")]
    NoResponse,
}

/// Deferred-trigger registration failures. Always best-effort.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("deferred triggers are not supported by this host")]
    Unsupported,

    #[error("host rejected registration: {0}")]
    Rejected(String),
}

/// Configuration load and validation failures.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Inbound control message failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed control message: {0}")]
    Malformed(String),

    #[error("unknown control message type: {0}")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_are_classified() {
        let err: OfflineError = NetworkFault::NoResponse.into();
        assert!(err.is_fault());

        let err: OfflineError = MessageError::Unknown("PING".into()).into();
        assert!(!err.is_fault());
    }

    #[test]
    fn populate_fault_names_url() {
        let err = PopulateFault::BadStatus {
            url: "/app.js".into(),
            status: 404,
        };
        assert_eq!(err.to_string(), "bad status 404 for /app.js");
    }
}
