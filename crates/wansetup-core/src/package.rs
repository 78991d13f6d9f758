//! C3: the uncompressed archive format carried inside the envelope.
//!
//! One record per filesystem entry: a bounded path, an item-type tag, and
//! for files a fixed-width length followed by exactly that many bytes. The
//! stream is terminated by a record with no path (the null-path sentinel).

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::security;
use crate::wire::{Reader, Writer};

const MAX_PATH_LEN: usize = 32_767;

const ITEM_TYPE_FILE: u8 = 0;
const ITEM_TYPE_FOLDER: u8 = 1;

/// Converts a filesystem path (relative to the archive base) into the
/// forward-slash form the wire format requires, regardless of host OS.
fn to_archive_path(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let s = part
                    .to_str()
                    .ok_or_else(|| Error::InvalidFormat("non-UTF-8 path component".into()))?;
                parts.push(s.to_string());
            }
            Component::CurDir => {}
            other => {
                return Err(Error::PathTraversal(format!(
                    "archive path contains {other:?}"
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Resolves an archive path against `target_dir` and rejects anything that
/// would land outside of it, without touching the filesystem — pure path
/// arithmetic so the check runs before a single payload byte is written.
fn resolve_within(target_dir: &Path, archive_path: &str) -> Result<PathBuf> {
    if archive_path.is_empty() {
        return Err(Error::PathTraversal("empty archive path".into()));
    }
    let mut resolved = target_dir.to_path_buf();
    for segment in archive_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::PathTraversal(format!(
                    "archive path escapes target directory: {archive_path}"
                )))
            }
            normal => resolved.push(normal),
        }
    }
    if !resolved.starts_with(target_dir) {
        return Err(Error::PathTraversal(format!(
            "archive path escapes target directory: {archive_path}"
        )));
    }
    Ok(resolved)
}

/// Writes one archive stream for every path `entries` yields, relative to
/// `base`. Returns the total uncompressed byte count written, which the
/// caller feeds into [`crate::envelope::write_envelope`]'s length field —
/// the archive is built once in memory-light streaming fashion and its
/// size is simply the running total of bytes this function writes.
pub fn create(
    base: &Path,
    entries: impl Iterator<Item = PathBuf>,
    output: &mut impl Write,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut w = Writer::new(CountingWriter::new(output))?;
    for abs_path in entries {
        cancel.check()?;
        let rel = abs_path
            .strip_prefix(base)
            .unwrap_or(abs_path.as_path());
        let archive_path = to_archive_path(rel)?;
        let metadata = fs::symlink_metadata(&abs_path)?;

        w.write_string(Some(&archive_path), MAX_PATH_LEN)?;
        if metadata.is_dir() {
            w.write_enum(ITEM_TYPE_FOLDER)?;
        } else {
            w.write_enum(ITEM_TYPE_FILE)?;
            let len = metadata.len();
            w.write_i64(len as i64)?;
            let mut file = fs::File::open(&abs_path)?;
            let copied = std::io::copy(&mut file, w.inner_mut())?;
            if copied != len {
                return Err(Error::IntegrityFailure(format!(
                    "short read while archiving {archive_path}"
                )));
            }
        }
    }
    // null-path sentinel
    w.write_string(None, MAX_PATH_LEN)?;
    let inner = w.into_inner();
    let total = inner.count();
    tracing::debug!(bytes = total, "archive stream written");
    Ok(total)
}

/// Extracts an archive stream into `target_dir`. Every record is
/// path-traversal-checked before any payload byte is read from the stream
/// for that record, so a malicious archive cannot write outside the target
/// even transiently.
pub fn extract(src: impl Read, target_dir: &Path, cancel: &CancellationToken) -> Result<()> {
    tracing::debug!(target = %target_dir.display(), "extracting archive stream");
    fs::create_dir_all(target_dir)?;
    let mut r = Reader::new(src)?;
    loop {
        cancel.check()?;
        let path = match r.read_string(MAX_PATH_LEN)? {
            None => break,
            Some(p) => p,
        };
        let item_type = r.read_enum(&[ITEM_TYPE_FILE, ITEM_TYPE_FOLDER])?;
        let dest = resolve_within(target_dir, &path)?;

        match item_type {
            ITEM_TYPE_FOLDER => {
                fs::create_dir_all(&dest)?;
                security::set_dir_mode(&dest, security::DEFAULT_DIR_MODE)?;
            }
            ITEM_TYPE_FILE => {
                let len = r.read_i64()?;
                if len < 0 {
                    return Err(Error::InvalidFormat(format!(
                        "negative file length for {path}"
                    )));
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = fs::File::create(&dest)?;
                r.copy_exact(len as u64, &mut file)?;
                security::set_dir_mode(&dest, security::DEFAULT_FILE_MODE)?;
            }
            _ => unreachable!("validated by read_enum"),
        }
    }
    Ok(())
}

/// Wraps a `Write` and counts bytes passed through, so `create` can report
/// the uncompressed length without a separate measuring pass over the tree.
struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_tree(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), b"hello").unwrap();
        fs::write(dir.join("sub/b.bin"), b"world!!").unwrap();
        fs::write(dir.join("empty.txt"), b"").unwrap();
    }

    fn walk(base: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![base.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    out.push(path.clone());
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out
    }

    #[test]
    fn roundtrip_preserves_tree() {
        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());
        let entries = walk(src.path());

        let mut buf = Vec::new();
        let cancel = CancellationToken::new();
        let total = create(src.path(), entries.into_iter(), &mut buf, &cancel).unwrap();
        assert!(total > 0);

        let dest = tempfile::tempdir().unwrap();
        extract(Cursor::new(buf), dest.path(), &cancel).unwrap();

        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dest.path().join("sub/b.bin")).unwrap(), b"world!!");
        assert_eq!(fs::read(dest.path().join("empty.txt")).unwrap(), b"");
    }

    #[test]
    fn extract_rejects_path_traversal() {
        let dest = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf).unwrap();
            w.write_string(Some("../escape.txt"), MAX_PATH_LEN).unwrap();
            w.write_enum(ITEM_TYPE_FILE).unwrap();
            w.write_i64(4).unwrap();
            w.write_bytes(b"evil").unwrap();
            w.write_string(None, MAX_PATH_LEN).unwrap();
        }

        let err = extract(Cursor::new(buf), dest.path(), &cancel).unwrap_err();
        assert!(matches!(err, Error::PathTraversal(_)));
        assert!(!dest.path().join("../escape.txt").exists());
    }

    #[test]
    fn cancellation_stops_create() {
        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());
        let entries = walk(src.path());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut buf = Vec::new();
        let err = create(src.path(), entries.into_iter(), &mut buf, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
