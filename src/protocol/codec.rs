//! Compact binary form of [`Envelope`]s.

use crate::error::CodecError;
use crate::protocol::Envelope;

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Encode an envelope for storage.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serde::encode_to_vec(envelope, config())?)
}

/// Decode a stored envelope. The whole slice must be consumed.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let (envelope, read): (Envelope, usize) = bincode::serde::decode_from_slice(bytes, config())?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(envelope)
}
