//! Error types for the streaming bridge.

use crate::transport::AddressFamily;

/// Errors that can occur while negotiating, starting or serving a stream.
///
/// Variants map to the failure categories of the session manager:
///
/// - **Allocation**: [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`NoInterface`](Self::NoInterface). Negotiation aborts and no state is kept.
/// - **Launch**: [`Launch`](Self::Launch). The transcoder could not be started;
///   everything reserved for the session is released first.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`StartCancelled`](Self::StartCancelled).
/// - **Fetch**: [`Fetch`](Self::Fetch), [`FetchStatus`](Self::FetchStatus) for
///   snapshot retrieval.
///
/// Missing AAC support and relay packet loss are not errors: both degrade the
/// stream and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No UDP port could be reserved within the allowed attempts.
    #[error("no free UDP port after {attempts} attempts")]
    PortRangeExhausted { attempts: usize },

    /// The host has no usable outbound interface for the peer's address family.
    #[error("no outbound {0} interface available")]
    NoInterface(AddressFamily),

    /// No pending negotiation exists for the session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session was stopped while its transcoder was being launched.
    #[error("session stopped during start: {0}")]
    StartCancelled(String),

    /// The transcoding subprocess failed to start or exited immediately.
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    /// Snapshot request failed at the transport level.
    #[error("snapshot fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Snapshot endpoint answered with a non-success status.
    #[error("snapshot endpoint returned HTTP {0}")]
    FetchStatus(u16),
}

impl StreamError {
    /// Whether this error is a resource-allocation failure during negotiation.
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::PortRangeExhausted { .. } | Self::NoInterface(_))
    }

    pub(crate) fn launch(program: impl Into<String>, reason: impl ToString) -> Self {
        Self::Launch {
            program: program.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_classification() {
        assert!(StreamError::PortRangeExhausted { attempts: 3 }.is_allocation());
        assert!(StreamError::NoInterface(AddressFamily::V6).is_allocation());
        assert!(!StreamError::SessionNotFound("a".into()).is_allocation());
        assert!(!StreamError::launch("ffmpeg", "missing").is_allocation());
    }

    #[test]
    fn launch_message_names_program() {
        let err = StreamError::launch("/usr/bin/ffmpeg", "exited with status 1");
        assert_eq!(
            err.to_string(),
            "failed to launch /usr/bin/ffmpeg: exited with status 1"
        );
    }
}
