//! Container format handlers.
//!
//! Every format parses its header when opened (failing with
//! `UnknownFormat` or `InvalidHeader` if the signature doesn't match),
//! enumerates its directory into a table of `Entry` values, and hands out a
//! reader for any one entry.  The media stream layer composes these three
//! operations into entry selection and reading, so handlers hold no cursor
//! state of their own.

use std::fmt;
use std::io::{self, Read};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::MediaError;
use crate::progress::Progress;
use crate::stream::ContainerHandle;

pub mod cbm;
pub mod dfi;
pub mod lnx;
pub mod synthetic;
pub mod t64;
pub mod tcrt;

/// The unit most CBM formats store data in: a 256-byte block less its
/// two-byte link.
pub const CBM_BLOCK_DATA_SIZE: u64 = 254;

/// Container formats known to the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// A 1541 disk image as raw GCR track data.
    G64,
    /// A 1541 sector image.
    D64,
    /// A 1571 sector image.
    D71,
    /// A 1581 sector image.
    D81,
    /// A Lynx disk archive.
    Lnx,
    /// A tape image.
    T64,
    /// A Tapecart cartridge image.
    Tcrt,
    /// A hard-disk filesystem image.
    Dfi,
    /// `json:` inline document.
    Json,
    /// `sha256:` digest of inline data.
    Sha256,
    /// `qr:` QR symbol of inline data.
    Qr,
}

static PROBE_ORDER: [Format; 8] = [
    Format::G64,
    Format::Lnx,
    Format::T64,
    Format::Tcrt,
    Format::Dfi,
    Format::D64,
    Format::D71,
    Format::D81,
];

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::G64 => "G64",
            Format::D64 => "D64",
            Format::D71 => "D71",
            Format::D81 => "D81",
            Format::Lnx => "LNX",
            Format::T64 => "T64",
            Format::Tcrt => "TCRT",
            Format::Dfi => "DFI",
            Format::Json => "JSON",
            Format::Sha256 => "SHA256",
            Format::Qr => "QR",
        }
    }

    /// Filename extensions (lowercase, without the dot) claimed by a format.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Format::G64 => &["g64"],
            Format::D64 => &["d64"],
            Format::D71 => &["d71"],
            Format::D81 => &["d81"],
            Format::Lnx => &["lnx"],
            Format::T64 => &["t64"],
            Format::Tcrt => &["tcrt"],
            Format::Dfi => &["dfi", "dhd"],
            Format::Json | Format::Sha256 | Format::Qr => &[],
        }
    }

    /// URL scheme (without the colon) of a synthetic format.
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Format::Json => Some("json"),
            Format::Sha256 => Some("sha256"),
            Format::Qr => Some("qr"),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Format> {
        let extension = extension.to_ascii_lowercase();
        PROBE_ORDER
            .iter()
            .find(|f| f.extensions().contains(&extension.as_str()))
            .copied()
    }

    /// Formats whose content is a directory of entries rather than a
    /// single generated file.
    pub fn is_container(&self) -> bool {
        !matches!(self, Format::Sha256 | Format::Qr)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One logical file (or directory) inside a container.  Entries are built
/// by a handler's directory parse and never change afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// Position in directory order, starting at 1.
    pub index: usize,
    pub name: String,
    /// The name as stored, before padding was stripped.
    pub raw_name: Vec<u8>,
    /// Number of bytes a reader of this entry yields.
    pub size: u64,
    pub kind: EntryKind,
    /// Format-specific type byte, interpreted by `FormatHandler::decode_type`.
    pub type_code: u8,
    /// Byte offset of contiguous entry data within the container.
    pub offset: u64,
    /// First (track, sector) of block-chained entry data.
    pub location: Option<(u8, u8)>,
    pub timestamp: Option<NaiveDateTime>,
    /// Load address served ahead of the data, for formats that store it
    /// apart from the data.
    pub load_address: Option<u16>,
    pub record_size: Option<u16>,
    /// Set when the entry's data can't be fully resolved.
    pub partial: bool,
    /// Extension of a container format stored in this entry.
    pub format_hint: Option<String>,
}

impl Entry {
    pub fn new(index: usize, name: String, size: u64) -> Entry {
        Entry {
            index,
            raw_name: name.as_bytes().to_vec(),
            name,
            size,
            kind: EntryKind::File,
            type_code: 0,
            offset: 0,
            location: None,
            timestamp: None,
            load_address: None,
            record_size: None,
            partial: false,
            format_hint: None,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Lowercase extension of the entry name, if it has one.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }
}

/// Lowercase text following the last dot of a name.
pub fn extension_of(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() => Some(name[dot + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// The capabilities every container format provides.  A handler owns the
/// container it was opened on, and is shared read-only by every stream
/// checked out against that container.
pub trait FormatHandler: Send + Sync {
    fn format(&self) -> Format;

    fn container(&self) -> &ContainerHandle;

    /// The format's storage unit: 256 for sector images, 254 for archives,
    /// 512 for hard-disk images.
    fn block_size(&self) -> usize;

    /// Offset within the container at which raw data seeks are based,
    /// skipping any container header.
    fn media_data_offset(&self) -> u64 {
        0
    }

    /// Whether filename matching is case-sensitive.
    fn case_sensitive(&self) -> bool {
        true
    }

    /// Disk, tape, or archive name from the header.
    fn label(&self) -> &str;

    /// Parse the directory in directory order.  Implementations call
    /// `progress.tick()` once per entry or directory block.
    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>>;

    /// Return a reader yielding exactly `entry.size` bytes of the entry.
    fn open_entry(&self, entry: &Entry, progress: &Progress) -> io::Result<Box<dyn Read + Send>>;

    /// Human-readable type of an entry, e.g. `PRG` or `SEQ<`.
    fn decode_type(&self, entry: &Entry) -> String;

    /// Walk the block chain starting at (`track`, `sector`) and return the
    /// number of data bytes it holds.  Only block-chained formats support
    /// this.
    fn seek_file_size(&self, _track: u8, _sector: u8, _progress: &Progress) -> io::Result<u64> {
        Err(MediaError::InvalidLayout.into())
    }
}

/// Open `container` as `format`, or probe every container format in turn
/// when no format is given.
pub fn open(container: ContainerHandle, format: Option<Format>) -> io::Result<Box<dyn FormatHandler>> {
    match format {
        Some(format) => open_as(container, format),
        None => {
            for &format in PROBE_ORDER.iter() {
                match open_as(container.clone(), format) {
                    Ok(handler) => return Ok(handler),
                    Err(ref e) if is_mismatch(e) => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(MediaError::UnknownFormat.into())
        }
    }
}

fn is_mismatch(error: &io::Error) -> bool {
    matches!(
        MediaError::from_io_error(error),
        Some(MediaError::UnknownFormat) | Some(MediaError::InvalidHeader) | Some(MediaError::ShortRead)
    )
}

fn open_as(container: ContainerHandle, format: Format) -> io::Result<Box<dyn FormatHandler>> {
    let handler: Box<dyn FormatHandler> = match format {
        Format::G64 => Box::new(cbm::CbmDos::open_g64(container)?),
        Format::D64 | Format::D71 | Format::D81 => {
            Box::new(cbm::CbmDos::open_sector_image(container, format)?)
        }
        Format::Lnx => Box::new(lnx::Lnx::open(container)?),
        Format::T64 => Box::new(t64::T64::open(container)?),
        Format::Tcrt => Box::new(tcrt::Tcrt::open(container)?),
        Format::Dfi => Box::new(dfi::Dfi::open(container)?),
        Format::Json => Box::new(synthetic::Json::open(container)?),
        Format::Sha256 | Format::Qr => return Err(MediaError::NotADirectory.into()),
    };
    debug!(format = %handler.format(), label = handler.label(), "opened container");
    Ok(handler)
}

/// Reads a contiguous byte range of a container.
pub struct RangeReader {
    container: ContainerHandle,
    offset: u64,
    remaining: u64,
}

impl RangeReader {
    pub fn new(container: ContainerHandle, offset: u64, length: u64) -> RangeReader {
        RangeReader {
            container,
            offset,
            remaining: length,
        }
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let wanted = (buf.len() as u64).min(self.remaining) as usize;
        if wanted == 0 {
            return Ok(0);
        }
        let count = self.container.read_at(self.offset, &mut buf[..wanted]);
        if count == 0 {
            return Err(MediaError::ShortRead.into());
        }
        self.offset += count as u64;
        self.remaining -= count as u64;
        Ok(count)
    }
}

/// Serve a two-byte load address ahead of contiguous data.
pub fn with_load_address(
    load_address: Option<u16>,
    data: RangeReader,
) -> Box<dyn Read + Send> {
    match load_address {
        Some(address) => Box::new(io::Cursor::new(address.to_le_bytes()).chain(data)),
        None => Box::new(data),
    }
}

/// Clamp a stored size so that `offset + size` stays within the container.
pub fn clamp_to_container(container: &ContainerHandle, offset: u64, size: u64) -> u64 {
    size.min(container.len().saturating_sub(offset))
}

/// CBM DOS file type names, shared by every format that stores them.
pub fn cbm_type_name(type_code: u8) -> &'static str {
    match type_code & 0x07 {
        0 => "DEL",
        1 => "SEQ",
        2 => "PRG",
        3 => "USR",
        4 => "REL",
        _ => "???",
    }
}
