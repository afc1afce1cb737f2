//! Turn-level error taxonomy.

use thiserror::Error;

use crate::chat::patch::PatchError;
use crate::remote::error::TransportError;

/// Why a streaming turn failed.
///
/// Either way the turn is aborted, the last good snapshot stays on screen,
/// a generic failure message is appended, and the turn is excluded from the
/// history replayed on the next request. The next `submit` starts clean.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("stream produced a malformed patch: {0}")]
    MalformedPatch(#[from] PatchError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
