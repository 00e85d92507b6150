//! Error types for registry operations.
//!
//! Only operations that can be handed a handle which no longer names a live
//! participant are fallible. Everything else (unlinking a missing link,
//! broadcasting to nobody, destroying twice) is a silent no-op.

use thiserror::Error;

use crate::registry::ParticipantId;

/// Errors returned by link and watch registration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The handle refers to a participant that was destroyed (or never
    /// belonged to this hub).
    #[error("participant {0} is not registered with this hub")]
    Stale(ParticipantId),

    /// The participant is in the middle of teardown and cannot gain links.
    #[error("participant {0} is going away")]
    GoingAway(ParticipantId),
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
