//! C1: a stream of self-describing primitives layered directly on any
//! `Read`/`Write`. Every [`Writer`] emits a one-byte serializer-version tag
//! before anything else; every [`Reader`] reads and remembers that tag so
//! downstream record parsers (the package codec, the trust-store blob) know
//! which wire variant they are looking at.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// The only serializer version this crate currently emits or understands.
pub const SERIALIZER_VERSION: u8 = 1;

fn unexpected_eof(what: &str) -> Error {
    Error::InvalidFormat(format!("unexpected EOF reading {what}"))
}

/// Thin writer that prefixes the stream with [`SERIALIZER_VERSION`] and
/// exposes length-prefixed, bounds-checked primitive encoders.
pub struct Writer<W: Write> {
    inner: W,
}

impl<W: Write> Writer<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(&[SERIALIZER_VERSION])?;
        Ok(Self { inner })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_all(&[v])?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    /// Unsigned LEB128 varint, used for all length prefixes.
    pub fn write_varint(&mut self, mut v: u64) -> Result<()> {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.inner.write_all(&[byte])?;
            if v == 0 {
                break;
            }
        }
        Ok(())
    }

    /// A nullable, length-bounded UTF-8 string: a presence byte (distinct
    /// from a zero-length string) then a varint length then the bytes.
    pub fn write_string(&mut self, value: Option<&str>, max_len: usize) -> Result<()> {
        match value {
            None => self.write_u8(0),
            Some(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > max_len {
                    return Err(Error::InvalidFormat(format!(
                        "string of {} bytes exceeds bound {max_len}",
                        bytes.len()
                    )));
                }
                self.write_u8(1)?;
                self.write_varint(bytes.len() as u64)?;
                self.inner.write_all(bytes)?;
                Ok(())
            }
        }
    }

    /// A single byte validated against a declared enum set at the call site.
    pub fn write_enum(&mut self, tag: u8) -> Result<()> {
        self.write_u8(tag)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

pub struct Reader<R: Read> {
    inner: R,
    pub version: u8,
}

impl<R: Read> Reader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut tag = [0u8; 1];
        inner
            .read_exact(&mut tag)
            .map_err(|_| unexpected_eof("serializer version tag"))?;
        Ok(Self {
            inner,
            version: tag[0],
        })
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Hands back the underlying stream positioned right after the bytes
    /// consumed so far — used by the envelope reader to splice a Brotli
    /// decompressor directly onto what remains.
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| unexpected_eof("u8"))?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| unexpected_eof("u32"))?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| unexpected_eof("u64"))?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| unexpected_eof("i64"))?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            if shift >= 64 {
                return Err(Error::InvalidFormat("varint too long".into()));
            }
            let byte = self.read_u8().map_err(|_| unexpected_eof("varint"))?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    /// Mirrors [`Writer::write_string`]; fails `InvalidFormat` if the
    /// decoded length exceeds `max_len` or the bytes are not valid UTF-8.
    pub fn read_string(&mut self, max_len: usize) -> Result<Option<String>> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => {
                let len = self.read_varint()? as usize;
                if len > max_len {
                    return Err(Error::InvalidFormat(format!(
                        "string length {len} exceeds bound {max_len}"
                    )));
                }
                let mut buf = vec![0u8; len];
                self.inner
                    .read_exact(&mut buf)
                    .map_err(|_| unexpected_eof("string bytes"))?;
                String::from_utf8(buf)
                    .map(Some)
                    .map_err(|e| Error::InvalidFormat(format!("non-UTF-8 string: {e}")))
            }
            other => Err(Error::InvalidFormat(format!(
                "invalid string presence byte: {other}"
            ))),
        }
    }

    /// Reads a single byte and validates it against `valid`.
    pub fn read_enum(&mut self, valid: &[u8]) -> Result<u8> {
        let tag = self.read_u8()?;
        if valid.contains(&tag) {
            Ok(tag)
        } else {
            Err(Error::InvalidFormat(format!("unknown enum tag {tag}")))
        }
    }

    pub fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| unexpected_eof("fixed byte span"))?;
        Ok(buf)
    }

    pub fn copy_exact(&mut self, len: u64, dest: &mut impl Write) -> Result<()> {
        let mut limited = (&mut self.inner).take(len);
        let copied = io::copy(&mut limited, dest)?;
        if copied != len {
            return Err(unexpected_eof("record payload"));
        }
        Ok(())
    }
}
