//! UTF-8 chunk codec for assistant output streams.
//!
//! Assistant output is forwarded live, so frames are not line-delimited:
//! every read yields whatever text is available. The codec only holds back
//! the trailing bytes of a multi-byte character that has not fully arrived,
//! so a chunk never ends in the middle of a code point.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use feature_relay::assistant::codec::ChunkCodec;
//!
//! let reader = FramedRead::new(child_stdout, ChunkCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::AppError;

/// Longest UTF-8 encoding of a single code point.
const MAX_CHAR_BYTES: usize = 4;

/// Decoder yielding the longest complete UTF-8 prefix of the read buffer.
#[derive(Debug, Default)]
pub struct ChunkCodec {
    _private: (),
}

impl ChunkCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ChunkCodec {
    type Item = String;
    type Error = AppError;

    /// Split off and decode every complete character in `src`.
    ///
    /// Returns `Ok(None)` when `src` is empty or holds only an incomplete
    /// trailing character. Invalid sequences that can never complete are
    /// decoded lossily rather than stalling the stream.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let complete = match std::str::from_utf8(src) {
            Ok(_) => src.len(),
            Err(err) => match err.error_len() {
                // Truncated trailing sequence; wait for more bytes.
                None if err.valid_up_to() > 0 || src.len() < MAX_CHAR_BYTES => err.valid_up_to(),
                // Invalid bytes: emit everything up to and including them.
                Some(bad) => err.valid_up_to() + bad,
                None => src.len(),
            },
        };

        if complete == 0 {
            return Ok(None);
        }

        let frame = src.split_to(complete);
        Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
    }

    /// Flush whatever remains at EOF, decoding any dangling bytes lossily.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.split();
                Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
            }
        }
    }
}
