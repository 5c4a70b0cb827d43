//! Error types for mural core
//!
//! Mirrors the failure taxonomy of the dispatcher:
//! - Configuration errors: fatal at startup
//! - Bounds errors: local to one write, logged and dropped
//! - Transport errors: retried once, then deferred to the next cooldown
//! - Rate-limit / ban / unverified: not errors at all, see `outcome`

use mural_canvas::CanvasError;

/// Startup configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config or roster file could not be read or written
    #[error("failed to access {path}: {source}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `FleetConfig`
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Roster file is not valid JSON
    #[error("failed to parse roster: {0}")]
    Roster(#[from] serde_json::Error),

    /// Roster has no identities
    #[error("roster is empty")]
    EmptyRoster,

    /// Source image could not be produced
    #[error("failed to load source image: {0}")]
    SourceImage(String),

    /// A value failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Palette, layout or image rejected by the canvas layer
    #[error("canvas configuration: {0}")]
    Canvas(#[from] CanvasError),
}

impl ConfigError {
    /// I/O error with the path that caused it
    #[inline]
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Pending-write queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Nothing pending
    #[error("queue is empty")]
    Empty,

    /// Batch does not fit
    #[error("queue is full (capacity: {capacity})")]
    Full {
        /// Configured capacity
        capacity: usize,
    },

    /// The owning agent has been retired
    #[error("agent is retired")]
    Retired,
}

/// Failures talking to the remote service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response within the write timeout
    #[error("timed out after {after_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        after_ms: u64,
    },

    /// Request could not be sent or response not decoded
    #[error("send failed: {0}")]
    Send(String),

    /// Connection closed by the remote side
    #[error("connection closed")]
    Closed,
}

/// Session setup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Credentials rejected
    #[error("login failed for {username}: {reason}")]
    LoginFailed {
        /// Identity that failed
        username: String,
        /// Reason reported by the provider
        reason: String,
    },

    /// Provider could not be reached
    #[error("session transport: {0}")]
    Transport(#[from] TransportError),
}

/// Main mural error type
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Startup configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Canvas layer error
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),

    /// Remote transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Session setup error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Every agent failed session setup
    #[error("no agent survived session setup")]
    NoLiveAgents,
}

impl FleetError {
    /// Whether the process must not proceed
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::NoLiveAgents => true,
            Self::Canvas(e) => e.is_configuration(),
            Self::Transport(_) | Self::Queue(_) | Self::Session(_) => false,
        }
    }

    /// Whether an immediate retry is allowed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mural_canvas::Point;

    #[test]
    fn fleet_error_display() {
        let err = FleetError::from(ConfigError::EmptyRoster);
        assert!(err.to_string().contains("roster is empty"));
    }

    #[test]
    fn fleet_error_is_fatal() {
        assert!(FleetError::from(ConfigError::EmptyRoster).is_fatal());
        assert!(FleetError::from(CanvasError::EmptyPalette).is_fatal());
        assert!(FleetError::NoLiveAgents.is_fatal());
        assert!(!FleetError::from(CanvasError::OutOfBounds {
            point: Point::new(0, 0)
        })
        .is_fatal());
        assert!(!FleetError::from(TransportError::Closed).is_fatal());
    }

    #[test]
    fn fleet_error_is_retryable() {
        assert!(FleetError::from(TransportError::Timeout { after_ms: 10 }).is_retryable());
        assert!(!FleetError::from(QueueError::Empty).is_retryable());
        assert!(!FleetError::from(ConfigError::EmptyRoster).is_retryable());
    }
}
