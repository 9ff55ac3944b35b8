use thiserror::Error;

use crate::http::response::StatusCode;
use crate::resolver::ResolveError;

/// Everything that can end a relay cycle early.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("resolving {name} failed: {source}")]
    Resolution {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("no addresses resolved for {0}")]
    NoBackends(String),

    #[error("cannot build outbound request: {0}")]
    Construction(String),

    #[error("exchange with backend {address} failed: {reason}")]
    Exchange { address: String, reason: String },

    #[error("relaying response body failed after status {status}: {source}")]
    Streaming {
        status: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("caller disconnected before the backend answered")]
    CallerDisconnected,
}

impl ForwardError {
    pub(crate) fn exchange(address: &str, reason: impl std::fmt::Display) -> Self {
        ForwardError::Exchange {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Status to send to the caller, or `None` when nothing can be sent
    /// any more (response already committed or caller gone).
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ForwardError::Resolution { .. }
            | ForwardError::NoBackends(_)
            | ForwardError::Exchange { .. } => Some(StatusCode::SERVICE_UNAVAILABLE),
            ForwardError::Construction(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            ForwardError::Streaming { .. } | ForwardError::CallerDisconnected => None,
        }
    }
}
