//! Byte-stream plumbing shared by every format: the raw container, the
//! per-checkout media stream that selects one entry at a time, and the
//! broker that shares parsed images between checkouts.

use std::io::{self, Read, SeekFrom};

use crate::error::MediaError;

pub mod broker;
pub mod container;
pub mod media;

pub use self::broker::ImageBroker;
pub use self::container::{Container, ContainerCursor, ContainerHandle};
pub use self::media::{MediaImage, MediaStream};

/// Size and position of a byte source.  `available()` is always
/// `size() - position()`, and a source is exhausted when nothing is left.
pub trait Seekable {
    fn size(&self) -> u64;
    fn position(&self) -> u64;

    #[inline]
    fn available(&self) -> u64 {
        self.size().saturating_sub(self.position())
    }

    #[inline]
    fn is_eos(&self) -> bool {
        self.available() == 0
    }
}

/// Delimited scanning over any reader.  The delimiter is consumed but not
/// included in the result, and scanning also stops when the reader is
/// exhausted.
pub trait Scanner: Read {
    fn read_until(&mut self, delimiter: u8) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == delimiter => break,
                Ok(_) => bytes.push(byte[0]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(bytes)
    }

    /// Read up to `length` bytes as text.  Non-ASCII bytes are replaced.
    fn read_string(&mut self, length: usize) -> io::Result<String> {
        let mut bytes = Vec::with_capacity(length);
        self.take(length as u64).read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_string_until(&mut self, delimiter: u8) -> io::Result<String> {
        let bytes = self.read_until(delimiter)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<R: Read + ?Sized> Scanner for R {}

/// Apply a `SeekFrom` to a stream of `size` bytes positioned at `current`.
/// A target past the end is clamped to `size`, so the position never
/// exceeds the size; seeking before the start is an error.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => offset_by(current, delta),
        SeekFrom::End(delta) => offset_by(size, delta),
    };
    target
        .map(|target| target.min(size))
        .ok_or_else(|| MediaError::InvalidOffset.into())
}

fn offset_by(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_until() {
        let mut cursor = Cursor::new(&b"LYNX\r 1 \rrest"[..]);
        assert_eq!(cursor.read_until(b'\r').unwrap(), b"LYNX");
        assert_eq!(cursor.read_string_until(b'\r').unwrap(), " 1 ");
        // Exhaustion without a delimiter returns what was read.
        assert_eq!(cursor.read_string_until(b'\r').unwrap(), "rest");
        assert_eq!(cursor.read_string_until(b'\r').unwrap(), "");
    }

    #[test]
    fn test_read_string() {
        let mut cursor = Cursor::new(&b"GCR-1541"[..]);
        assert_eq!(cursor.read_string(3).unwrap(), "GCR");
        assert_eq!(cursor.read_string(10).unwrap(), "-1541");
    }

    #[test]
    fn test_resolve_seek() {
        assert_eq!(resolve_seek(SeekFrom::Start(5), 2, 10).unwrap(), 5);
        assert_eq!(resolve_seek(SeekFrom::Current(-2), 2, 10).unwrap(), 0);
        assert_eq!(resolve_seek(SeekFrom::End(-4), 2, 10).unwrap(), 6);
        assert_eq!(resolve_seek(SeekFrom::End(4), 2, 10).unwrap(), 10);
        assert_eq!(resolve_seek(SeekFrom::Start(11), 2, 10).unwrap(), 10);
        assert_eq!(resolve_seek(SeekFrom::Current(i64::MAX), 2, 10).unwrap(), 10);
        assert!(resolve_seek(SeekFrom::End(i64::MIN), 2, 10).unwrap_err() == MediaError::InvalidOffset);
        assert!(resolve_seek(SeekFrom::Current(-3), 2, 10).unwrap_err() == MediaError::InvalidOffset);
    }
}
