//! Body framing for the node API.
//!
//! `/sendraw` answers with a base64 distribution key, `/receiveraw` expects
//! the key base64-encoded in a header, and generic endpoints take JSON.
//! Response bodies arrive in frames, so base64 is decoded incrementally with
//! [`Base64StreamDecoder`] and the first invalid quantum fails the call.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;

/// Standard alphabet with canonical padding. Non-zero bits in the final
/// symbol are accepted, as the node's own encoder tolerates them.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Errors from encoding request bodies or decoding response bodies.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode JSON request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 in quantum starting at byte {offset}: {source}")]
    Base64 {
        offset: usize,
        source: base64::DecodeError,
    },

    #[error("base64 data continues after padding at byte {offset}")]
    TrailingData { offset: usize },

    #[error("base64 stream ended mid-quantum ({pending} dangling bytes)")]
    Truncated { pending: usize },
}

/// Incremental standard-alphabet base64 decoder.
///
/// Feed body frames to [`update`](Self::update) as they arrive; each call
/// decodes every complete 4-byte quantum seen so far. CR and LF are skipped.
/// Padding ends the stream: any further data is an error.
#[derive(Debug, Default)]
pub struct Base64StreamDecoder {
    quantum: [u8; 4],
    filled: usize,
    /// Significant (non-newline) bytes consumed so far.
    consumed: usize,
    padded: bool,
}

impl Base64StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` as forms complete quanta, buffering the rest.
    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoded = Vec::with_capacity(chunk.len() / 4 * 3);
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                continue;
            }
            if self.padded {
                return Err(CodecError::TrailingData {
                    offset: self.consumed,
                });
            }
            self.quantum[self.filled] = byte;
            self.filled += 1;
            self.consumed += 1;

            if self.filled == self.quantum.len() {
                self.filled = 0;
                KEY_ENGINE
                    .decode_vec(self.quantum, &mut decoded)
                    .map_err(|source| CodecError::Base64 {
                        offset: self.consumed - self.quantum.len(),
                        source,
                    })?;
                self.padded = self.quantum.contains(&b'=');
            }
        }
        Ok(decoded)
    }

    /// Finish the stream. Fails if a partial quantum is still buffered.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.filled != 0 {
            return Err(CodecError::Truncated {
                pending: self.filled,
            });
        }
        Ok(())
    }
}

/// Encode a raw distribution key for the `c11n-key` header.
pub fn encode_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

/// Serialize a request value as a JSON body.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}
