use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use memmap::{Mmap, MmapOptions};

use crate::error::MediaError;
use crate::stream::Seekable;

/// Shared ownership of an open container.  The container closes once the
/// last media stream, entry reader, or broker entry holding it is dropped.
pub type ContainerHandle = Arc<Container>;

/// Provide backing storage (file or memory) for the raw bytes of an image,
/// archive, or synthetic source.
pub enum Container {
    Map(Mmap),
    Memory(Box<[u8]>),
}

impl Container {
    /// Map an image file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Container> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            // Zero-length files can't be mapped.
            return Ok(Container::Memory(Box::new([])));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Container::Map(mmap))
    }

    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Container {
        Container::Memory(bytes.into().into_boxed_slice())
    }

    /// Drain any reader into an in-memory container.  This is how an entry
    /// of one container becomes a container in its own right.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Container> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Container::from_bytes(bytes))
    }

    pub fn into_handle(self) -> ContainerHandle {
        Arc::new(self)
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Container::Map(mmap) => &mmap[..],
            Container::Memory(array) => &array[..],
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Return exactly `length` bytes at `offset`, or `ShortRead` if the
    /// container ends first.
    pub fn slice(&self, offset: u64, length: usize) -> io::Result<&[u8]> {
        let bytes = self.bytes();
        let start = usize::try_from(offset).map_err(|_| MediaError::InvalidOffset.to_io_error())?;
        match start.checked_add(length) {
            Some(end) if end <= bytes.len() => Ok(&bytes[start..end]),
            _ => Err(MediaError::ShortRead.into()),
        }
    }

    /// Copy as many bytes as are available at `offset` into `buf`, returning
    /// the count.  Reading at or past the end returns 0.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let bytes = self.bytes();
        if offset >= bytes.len() as u64 {
            return 0;
        }
        let start = offset as usize;
        let count = buf.len().min(bytes.len() - start);
        buf[..count].copy_from_slice(&bytes[start..start + count]);
        count
    }
}

/// A positioned view of a container's raw bytes, used by the header and
/// directory parsers that walk a container sequentially.
pub struct ContainerCursor {
    container: ContainerHandle,
    position: u64,
}

impl ContainerCursor {
    pub fn new(container: ContainerHandle) -> ContainerCursor {
        ContainerCursor {
            container,
            position: 0,
        }
    }

    pub fn at(container: ContainerHandle, position: u64) -> ContainerCursor {
        ContainerCursor {
            container,
            position,
        }
    }

    /// Read exactly `length` bytes, advancing the cursor.
    pub fn take(&mut self, length: usize) -> io::Result<&[u8]> {
        let slice = self.container.slice(self.position, length)?;
        self.position += length as u64;
        Ok(slice)
    }
}

impl Seekable for ContainerCursor {
    fn size(&self) -> u64 {
        self.container.len()
    }

    fn position(&self) -> u64 {
        self.position
    }
}

impl Read for ContainerCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.container.read_at(self.position, buf);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for ContainerCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = super::resolve_seek(pos, self.position, self.container.len())?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Scanner;

    #[test]
    fn test_slice_bounds() {
        let container = Container::from_bytes(vec![1, 2, 3, 4]);
        assert_eq!(container.slice(1, 3).unwrap(), &[2, 3, 4]);
        assert!(container.slice(2, 3).unwrap_err() == MediaError::ShortRead);
        assert!(container.slice(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_read_at_end() {
        let container = Container::from_bytes(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(container.read_at(1, &mut buf), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(container.read_at(3, &mut buf), 0);
        assert_eq!(container.read_at(100, &mut buf), 0);
    }

    #[test]
    fn test_cursor_tracks_position() {
        let handle = Container::from_bytes(&b"ONE\rTWO\rTHREE"[..]).into_handle();
        let mut cursor = ContainerCursor::new(handle);
        assert_eq!(cursor.read_string_until(b'\r').unwrap(), "ONE");
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.available(), 9);
        assert_eq!(ContainerCursor::take(&mut cursor, 3).unwrap(), b"TWO");
        cursor.seek(SeekFrom::Current(1)).unwrap();
        assert_eq!(cursor.read_string_until(b'\r').unwrap(), "THREE");
        assert!(cursor.is_eos());
        assert_eq!(cursor.seek(SeekFrom::End(5)).unwrap(), 13);
        assert_eq!(cursor.position(), cursor.size());
    }

    #[test]
    fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"C64 tape").unwrap();
        let container = Container::open(file.path()).unwrap();
        assert_eq!(container.len(), 8);
        assert_eq!(container.slice(0, 3).unwrap(), b"C64");

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(Container::open(empty.path()).unwrap().is_empty());
    }
}
