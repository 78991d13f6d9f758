//! C2: the compression envelope wrapped around a serialized package stream.
//!
//! The envelope never negotiates an algorithm on the wire — Brotli is the
//! only codec this crate speaks, so the header only needs to say whether an
//! uncompressed-length hint follows, not which algorithm produced the body.
//! Both read and write sides stream: the package body is never buffered in
//! full, matching the dual-stream extraction path in [`crate::package`].

use std::io::{Read, Write};

use brotli::enc::backward_references::BrotliEncoderParams;
use brotli::{CompressorWriter, Decompressor};

use crate::error::{Error, Result};
use crate::wire::{Reader, Writer, SERIALIZER_VERSION};

const BROTLI_QUALITY: i32 = 11;
const BROTLI_LG_WINDOW: i32 = 22;
const BROTLI_BUFFER_SIZE: usize = 1 << 16;

const FLAG_LENGTH_PRESENT: u8 = 0b0000_0001;
const FLAG_ALGORITHM_ABSENT: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub serializer_version: u8,
    pub flags: u8,
    pub uncompressed_len: Option<u64>,
}

impl EnvelopeHeader {
    fn new(uncompressed_len: u64) -> Self {
        Self {
            serializer_version: SERIALIZER_VERSION,
            flags: FLAG_LENGTH_PRESENT | FLAG_ALGORITHM_ABSENT,
            uncompressed_len: Some(uncompressed_len),
        }
    }

    pub fn has_length(&self) -> bool {
        self.flags & FLAG_LENGTH_PRESENT != 0
    }
}

/// Writes the envelope header followed by a Brotli-compressed copy of
/// `body`, streaming both sides. `uncompressed_len` is known up front
/// because the caller already measured it in the package codec's first
/// pass (spec's two-pass create: measure, then stream-compress).
pub fn write_envelope(dest: impl Write, uncompressed_len: u64, mut body: impl Read) -> Result<()> {
    let mut w = Writer::new(dest)?;
    let header = EnvelopeHeader::new(uncompressed_len);
    w.write_u8(header.flags)?;
    w.write_varint(uncompressed_len)?;

    let mut params = BrotliEncoderParams::default();
    params.quality = BROTLI_QUALITY;
    params.lgwin = BROTLI_LG_WINDOW;
    {
        let mut encoder = CompressorWriter::with_params(w.inner_mut(), BROTLI_BUFFER_SIZE, &params);
        std::io::copy(&mut body, &mut encoder)?;
        encoder.flush()?;
    }
    w.flush()?;
    Ok(())
}

/// Reads the envelope header and returns a streaming Brotli decompressor
/// over the remainder of `src`. The caller drives it like any other
/// `Read`; nothing here materializes the archive in memory.
pub fn open_envelope<R: Read>(src: R) -> Result<(EnvelopeHeader, Decompressor<R>)> {
    let mut r = Reader::new(src)?;
    if r.version != SERIALIZER_VERSION {
        return Err(Error::UnsupportedFormat(format!(
            "envelope serializer version {} is not supported",
            r.version
        )));
    }
    let flags = r.read_u8()?;
    let uncompressed_len = if flags & FLAG_LENGTH_PRESENT != 0 {
        Some(r.read_varint()?)
    } else {
        None
    };
    let header = EnvelopeHeader {
        serializer_version: r.version,
        flags,
        uncompressed_len,
    };
    let inner = r.into_inner();
    Ok((header, Decompressor::new(inner, BROTLI_BUFFER_SIZE)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_preserves_bytes_and_length() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(64);
        let mut compressed = Vec::new();
        write_envelope(&mut compressed, payload.len() as u64, Cursor::new(&payload)).unwrap();

        let (header, mut decompressor) = open_envelope(Cursor::new(&compressed)).unwrap();
        assert_eq!(header.uncompressed_len, Some(payload.len() as u64));
        assert!(header.has_length());

        let mut out = Vec::new();
        decompressor.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn rejects_future_serializer_version() {
        let mut buf = vec![SERIALIZER_VERSION + 1, FLAG_LENGTH_PRESENT, 0];
        buf.extend_from_slice(b"garbage");
        let err = open_envelope(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn empty_body_roundtrips() {
        let mut compressed = Vec::new();
        write_envelope(&mut compressed, 0, Cursor::new(&[][..])).unwrap();
        let (header, mut decompressor) = open_envelope(Cursor::new(&compressed)).unwrap();
        assert_eq!(header.uncompressed_len, Some(0));
        let mut out = Vec::new();
        decompressor.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
