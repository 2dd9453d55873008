use alloc::string::String;

use crate::NodeName;

/// Protocol failure kinds.
///
/// [`Error::MissingBlindKey`] is recoverable (the member waits for more
/// messages); everything else either aborts the current exchange or the whole
/// session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A tree invariant does not hold.
    #[error("malformed tree: {0}")]
    Structure(String),

    /// A lookup by member id or node name missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A blinded key was requested before the private key was set.
    #[error("private key not set for node {0}")]
    Uninit(NodeName),

    /// The recurrence needs a blinded key that has not been received yet.
    #[error("blinded key for node {0} not yet received")]
    MissingBlindKey(NodeName),

    /// A leave event would reduce the group below two members.
    #[error("leave event would empty the group")]
    GroupEmpty,

    /// Publish or subscribe failure in the transport layer.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A frame could not be parsed.
    #[error("malformed wire frame: {0}")]
    Wire(String),
}

/// Protocol result alias.
pub type Result<T> = core::result::Result<T, Error>;
