//! Newline-delimited JSON codec.
//!
//! Used for both session IPC and stdio tool transports. Each message is a
//! single compact JSON value terminated by `\n`. The decoded type and the
//! encoded type are independent so one codec can sit on both halves of a
//! request/response stream.

use bytes::{Buf, BufMut, BytesMut};
use log::warn;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum message length (16 MB)
pub const DEFAULT_MAX_LENGTH: usize = 16 * 1024 * 1024;

/// Newline-delimited JSON codec decoding `D`.
#[derive(Debug)]
pub struct NdJsonCodec<D> {
    _phantom: PhantomData<fn() -> D>,
    max_length: usize,
    skip_invalid: bool,
}

impl<D> NdJsonCodec<D> {
    /// Create a new codec with default max length (16 MB).
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
            max_length: DEFAULT_MAX_LENGTH,
            skip_invalid: false,
        }
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            ..Self::new()
        }
    }

    /// Drop lines that are not valid messages instead of failing the stream.
    ///
    /// Some tool servers write banners or log lines to stdout.
    pub fn skipping_invalid(mut self) -> Self {
        self.skip_invalid = true;
        self
    }

    /// Get the max message length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl<D> Default for NdJsonCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for NdJsonCodec<D> {
    fn clone(&self) -> Self {
        Self {
            _phantom: PhantomData,
            max_length: self.max_length,
            skip_invalid: self.skip_invalid,
        }
    }
}

fn too_large(length: usize, max: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("Message too large: {} > {}", length, max),
    )
}

impl<D: DeserializeOwned> Decoder for NdJsonCodec<D> {
    type Item = D;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(too_large(src.len(), self.max_length));
                }
                return Ok(None);
            };

            if pos > self.max_length {
                return Err(too_large(pos, self.max_length));
            }

            // Take the line, then skip the newline
            let line = src.split_to(pos);
            src.advance(1);

            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice(line) {
                Ok(item) => return Ok(Some(item)),
                Err(e) if self.skip_invalid => {
                    warn!("Skipping non-JSON line ({}): {}", e, String::from_utf8_lossy(line));
                }
                Err(e) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("JSON error: {}", e),
                    ));
                }
            }
        }
    }
}

impl<D, E: Serialize> Encoder<E> for NdJsonCodec<D> {
    type Error = std::io::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        // Compact JSON never contains a raw newline
        let json = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        if json.len() > self.max_length {
            return Err(too_large(json.len(), self.max_length));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');

        Ok(())
    }
}
