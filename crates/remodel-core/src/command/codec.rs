//! JSON wire codec for command batches.
//!
//! Bit-level framing is a transport concern; this boundary only guarantees
//! that a batch decodes into the closed command alphabet, in order, or fails
//! as a protocol error.

use crate::{
    command::Command,
    error::{ErrorOrigin, InternalError},
};

/// Encode a command batch, preserving order.
pub fn encode_batch(commands: &[Command]) -> Result<String, InternalError> {
    serde_json::to_string(commands).map_err(|err| {
        InternalError::internal(ErrorOrigin::Command, format!("batch encode failed: {err}"))
    })
}

/// Decode a command batch. Unknown command ids and malformed payloads are
/// protocol errors; the peers' schemas have diverged and no retry will help.
pub fn decode_batch(payload: &str) -> Result<Vec<Command>, InternalError> {
    serde_json::from_str(payload).map_err(|err| {
        InternalError::protocol(ErrorOrigin::Command, format!("batch decode failed: {err}"))
    })
}
