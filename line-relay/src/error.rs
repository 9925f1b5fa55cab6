use thiserror::Error;

/// Why a line could not be handed to a peer's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The peer has already been closed, or its writer is gone.
    #[error("peer connection is closed")]
    Closed,
    /// The peer's outbox stayed full past the write timeout. The peer is
    /// closed as a side effect.
    #[error("peer stopped accepting writes")]
    Stalled,
}
