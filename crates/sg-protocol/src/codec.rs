//! Tokio codec for newline-delimited JSON frames

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::ProtocolError;

/// Maximum length of a single frame in bytes (1 MiB)
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// One decoded line: either a frame or the reason that line was rejected
pub type DecodedFrame<T> = Result<T, ProtocolError>;

/// Codec decoding `T` from JSON lines and encoding any serializable frame
///
/// Blank lines are skipped. A line that is not valid JSON for `T`, or is
/// longer than [`MAX_FRAME_LENGTH`], is yielded as an `Err` item and the
/// stream carries on with the next line. Only I/O failures end the stream.
#[derive(Debug)]
pub struct JsonLineCodec<T> {
    lines: LinesCodec,
    max_length: usize,
    _frame: PhantomData<fn() -> T>,
}

impl<T> JsonLineCodec<T> {
    /// Create a new codec with the default maximum frame length
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    /// Create a new codec with a custom maximum frame length
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
            _frame: PhantomData,
        }
    }

    /// Map one line-codec result; `Ok(None)` means a blank line to skip
    fn frame(
        &self,
        line: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Option<DecodedFrame<T>>>, ProtocolError>
    where
        T: DeserializeOwned,
    {
        match line {
            Ok(Some(line)) if line.trim().is_empty() => Ok(None),
            Ok(Some(line)) => Ok(Some(Some(
                serde_json::from_str(line.trim()).map_err(ProtocolError::from),
            ))),
            Ok(None) => Ok(Some(None)),
            // The line codec drops the rest of an oversized line by itself
            Err(e) => match ProtocolError::from_lines(e, self.max_length) {
                ProtocolError::Io(e) => Err(ProtocolError::Io(e)),
                rejected => Ok(Some(Some(Err(rejected)))),
            },
        }
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = DecodedFrame<T>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode(src);
            if let Some(item) = self.frame(line)? {
                return Ok(item);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode_eof(src);
            if let Some(item) = self.frame(line)? {
                return Ok(item);
            }
        }
    }
}

impl<T, F: Serialize> Encoder<F> for JsonLineCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, frame: F, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&frame)?;
        if json.len() > self.max_length {
            return Err(ProtocolError::FrameTooLarge {
                max: self.max_length,
            });
        }

        dst.reserve(json.len() + 1);
        dst.extend_from_slice(json.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
