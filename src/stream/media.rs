use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::MediaError;
use crate::format::{self, Entry, Format, FormatHandler};
use crate::progress::Progress;
use crate::stream::{resolve_seek, ContainerHandle, Seekable};
use crate::util::wildcard;

/// The parsed, read-only state of one container: its format handler and,
/// once first needed, its entry table.  A `MediaImage` is shared by every
/// `MediaStream` checked out against the same URL.
pub struct MediaImage {
    url: String,
    handler: Box<dyn FormatHandler>,
    progress: Progress,
    entries: Mutex<Option<Arc<Vec<Entry>>>>,
}

impl MediaImage {
    pub fn new(url: &str, handler: Box<dyn FormatHandler>, progress: Progress) -> MediaImage {
        MediaImage {
            url: url.to_string(),
            handler,
            progress,
            entries: Mutex::new(None),
        }
    }

    /// Parse the header of `container`, either as `format` or by probing
    /// every known container format.
    pub fn open(
        url: &str,
        container: ContainerHandle,
        format: Option<Format>,
        progress: Progress,
    ) -> io::Result<MediaImage> {
        let handler = format::open(container, format)?;
        debug!(url, format = %handler.format(), "opened media image");
        Ok(MediaImage::new(url, handler, progress))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn handler(&self) -> &dyn FormatHandler {
        self.handler.as_ref()
    }

    pub fn format(&self) -> Format {
        self.handler.format()
    }

    pub fn container(&self) -> &ContainerHandle {
        self.handler.container()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// The entry table in directory order.  The directory is parsed on the
    /// first call and cached for the life of the image.
    pub fn entries(&self) -> io::Result<Arc<Vec<Entry>>> {
        let mut cached = self.entries.lock();
        if let Some(ref entries) = *cached {
            return Ok(entries.clone());
        }
        let mut progress = self.progress.bounded(self.progress.limits().max_entries);
        let entries = Arc::new(self.handler.entries(&mut progress)?);
        debug!(url = %self.url, entries = entries.len(), "loaded entry table");
        *cached = Some(entries.clone());
        Ok(entries)
    }

    /// Check out a new stream with its own cursor.
    pub fn stream(self: &Arc<Self>) -> MediaStream {
        MediaStream::new(self.clone())
    }
}

impl fmt::Debug for MediaImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MediaImage")
            .field("url", &self.url)
            .field("format", &self.handler.format())
            .finish()
    }
}

/// One checkout of a media image.  When no entry is selected the stream
/// reads the container's raw bytes; once an entry is selected, it reads the
/// entry's decoded bytes.  Position and selection belong to this stream
/// alone, so concurrent readers each check out their own.
pub struct MediaStream {
    image: Arc<MediaImage>,
    position: u64,
    entry: Option<Entry>,
    reader: Option<Box<dyn Read + Send>>,
    entry_position: u64,
    /// Index of the next entry `get_next_entry` returns.
    cursor: usize,
}

impl MediaStream {
    pub fn new(image: Arc<MediaImage>) -> MediaStream {
        MediaStream {
            image,
            position: 0,
            entry: None,
            reader: None,
            entry_position: 0,
            cursor: 0,
        }
    }

    pub fn image(&self) -> &Arc<MediaImage> {
        &self.image
    }

    pub fn block_size(&self) -> usize {
        self.image.handler.block_size()
    }

    pub fn media_data_offset(&self) -> u64 {
        self.image.handler.media_data_offset()
    }

    /// The selected entry, if any.
    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    pub fn decode_type(&self, entry: &Entry) -> String {
        self.image.handler.decode_type(entry)
    }

    fn select(&mut self, entry: Entry) {
        debug!(url = %self.image.url, entry = %entry.name, index = entry.index, "selected entry");
        self.entry = Some(entry);
        self.reader = None;
        self.entry_position = 0;
    }

    /// Select the first entry, in directory order, whose name matches
    /// `pattern`.  `*` and `?` wildcards are honored, and case sensitivity
    /// follows the container format.
    pub fn seek_entry(&mut self, pattern: &str) -> io::Result<&Entry> {
        let entries = self.image.entries()?;
        let case_sensitive = self.image.handler.case_sensitive();
        let entry = entries
            .iter()
            .find(|e| wildcard::matches(pattern, &e.name, case_sensitive))
            .cloned()
            .ok_or_else(|| MediaError::NotFound.to_io_error())?;
        self.select(entry);
        self.current()
    }

    /// Select an entry by its 1-based position in directory order.
    pub fn seek_entry_index(&mut self, index: usize) -> io::Result<&Entry> {
        if index == 0 {
            return Err(MediaError::InvalidEntryIndex.into());
        }
        let entries = self.image.entries()?;
        let entry = entries
            .get(index - 1)
            .cloned()
            .ok_or_else(|| MediaError::NotFound.to_io_error())?;
        self.select(entry);
        self.current()
    }

    /// Select the entry named by `path`.  Leading and trailing slashes are
    /// ignored.  Paths through a nested container are resolved by
    /// `vfs::MFile`; here, descending through an entry is only diagnosed.
    pub fn seek_path(&mut self, path: &str) -> io::Result<&Entry> {
        let mut components = path.split('/').filter(|c| !c.is_empty());
        let first = components.next().ok_or_else(|| MediaError::NotFound.to_io_error())?;
        if components.next().is_none() {
            return self.seek_entry(first);
        }
        let entry = self.seek_entry(first)?.clone();
        self.clear_entry();
        if entry.is_dir() && entry.partial {
            Err(MediaError::Partial.into())
        } else if entry.is_dir() {
            Err(MediaError::NotFound.into())
        } else {
            Err(MediaError::NotADirectory.into())
        }
    }

    /// Return to raw container mode.
    pub fn clear_entry(&mut self) {
        self.entry = None;
        self.reader = None;
        self.entry_position = 0;
    }

    fn current(&self) -> io::Result<&Entry> {
        self.entry.as_ref().ok_or_else(|| MediaError::NotFound.to_io_error())
    }

    /// Return the next entry in directory order, or None once the directory
    /// is exhausted.  The following call starts again from the first entry.
    pub fn get_next_entry(&mut self) -> io::Result<Option<Entry>> {
        let entries = self.image.entries()?;
        match entries.get(self.cursor) {
            Some(entry) => {
                self.cursor += 1;
                Ok(Some(entry.clone()))
            }
            None => {
                self.cursor = 0;
                Ok(None)
            }
        }
    }

    pub fn rewind_directory(&mut self) {
        self.cursor = 0;
    }

    /// Position raw reads `offset` bytes past the format's data offset.
    pub fn seek_data(&mut self, offset: u64) -> io::Result<u64> {
        let target = self
            .media_data_offset()
            .checked_add(offset)
            .ok_or_else(|| MediaError::InvalidOffset.to_io_error())?;
        self.clear_entry();
        self.position = target.min(self.image.container().len());
        Ok(self.position)
    }

    /// Walk a block chain from (`track`, `sector`) and return its data
    /// length.  Fails for formats that don't store block chains.
    pub fn seek_file_size(&self, track: u8, sector: u8) -> io::Result<u64> {
        self.image
            .handler
            .seek_file_size(track, sector, &self.image.progress)
    }

    fn entry_reader(&mut self) -> io::Result<&mut Box<dyn Read + Send>> {
        if self.reader.is_none() {
            let entry = self.current()?;
            let reader = self.image.handler.open_entry(entry, &self.image.progress)?;
            self.reader = Some(reader);
        }
        self.reader.as_mut().ok_or_else(|| MediaError::Unknown.to_io_error())
    }

    /// Reposition within the selected entry.  Moving backwards reopens the
    /// entry, since entry readers only move forward.
    fn seek_in_entry(&mut self, target: u64) -> io::Result<()> {
        if target < self.entry_position {
            self.reader = None;
            self.entry_position = 0;
        }
        let skip = target - self.entry_position;
        if skip > 0 {
            let reader = self.entry_reader()?;
            let skipped = io::copy(&mut reader.take(skip), &mut io::sink())?;
            self.entry_position += skipped;
        }
        self.entry_position = target;
        Ok(())
    }
}

impl Seekable for MediaStream {
    fn size(&self) -> u64 {
        match self.entry {
            Some(ref entry) => entry.size,
            None => self.image.container().len(),
        }
    }

    fn position(&self) -> u64 {
        match self.entry {
            Some(_) => self.entry_position,
            None => self.position,
        }
    }
}

impl Read for MediaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.entry.is_none() {
            let count = self.image.container().read_at(self.position, buf);
            self.position += count as u64;
            return Ok(count);
        }
        // Never hand out more than the entry's size, whatever the reader
        // would produce.
        let wanted = (buf.len() as u64).min(self.available()) as usize;
        if wanted == 0 {
            return Ok(0);
        }
        let count = self.entry_reader()?.read(&mut buf[..wanted])?;
        self.entry_position += count as u64;
        Ok(count)
    }
}

impl Seek for MediaStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.position(), self.size())?;
        match self.entry {
            Some(_) => self.seek_in_entry(target)?,
            None => self.position = target,
        }
        Ok(target)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("url", &self.image.url)
            .field("entry", &self.entry.as_ref().map(|e| &e.name))
            .field("position", &self.position())
            .finish()
    }
}
