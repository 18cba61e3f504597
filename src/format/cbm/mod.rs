//! CBM DOS disk images: D64, D71 and D81 sector images, and G64 GCR images.
//!
//! All four share one directory reader.  Only the way a (track, sector)
//! address turns into 256 bytes differs, which is what `SectorSource`
//! abstracts: sector images compute an offset from the geometry, and G64
//! images scan the raw GCR track for the sector's header.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::MediaError;
use crate::format::{cbm_type_name, Entry, Format, FormatHandler, CBM_BLOCK_DATA_SIZE};
use crate::petscii::{self, PADDING_BYTE};
use crate::progress::Progress;
use crate::stream::ContainerHandle;
use crate::util::le16;

pub mod block;
pub mod chain;

use self::block::{
    Geometry, GcrSectors, LinearSectors, Location, SectorSource, D64_GEOMETRIES, D71_GEOMETRIES,
    D81_GEOMETRIES,
};
use self::chain::{ChainIterator, ChainReader};

const DISK_NAME_SIZE: usize = 16;
const ENTRY_SIZE: usize = 32;
const FILENAME_SIZE: usize = 16;

const ENTRY_TYPE_OFFSET: usize = 0x02;
const ENTRY_START_OFFSET: usize = 0x03;
const ENTRY_NAME_OFFSET: usize = 0x05;
const ENTRY_RECORD_LENGTH_OFFSET: usize = 0x17;
const ENTRY_BLOCKS_OFFSET: usize = 0x1E;

const FILE_TYPE_REL: u8 = 0x04;
const FILE_ATTRIB_LOCKED_MASK: u8 = 0x40;
const FILE_ATTRIB_CLOSED_MASK: u8 = 0x80;

/// Where the header block keeps the disk name, id, and DOS type, and where
/// the directory chain begins.
struct HeaderLayout {
    location: Location,
    disk_name_offset: usize,
    disk_id_offset: usize,
    dos_type_offset: usize,
    first_directory: Location,
}

static HEADER_1541: HeaderLayout = HeaderLayout {
    location: Location(18, 0),
    disk_name_offset: 0x90,
    disk_id_offset: 0xA2,
    dos_type_offset: 0xA5,
    first_directory: Location(18, 1),
};

static HEADER_1581: HeaderLayout = HeaderLayout {
    location: Location(40, 0),
    disk_name_offset: 0x04,
    disk_id_offset: 0x16,
    dos_type_offset: 0x19,
    first_directory: Location(40, 3),
};

/// The parsed disk header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub disk_name: String,
    pub disk_id: [u8; 2],
    pub dos_type: [u8; 2],
}

impl Header {
    fn parse(block: &[u8], layout: &HeaderLayout) -> Header {
        let name = &block[layout.disk_name_offset..layout.disk_name_offset + DISK_NAME_SIZE];
        let id = layout.disk_id_offset;
        let dos = layout.dos_type_offset;
        Header {
            disk_name: petscii::from_padded_bytes(name, PADDING_BYTE),
            disk_id: [block[id], block[id + 1]],
            dos_type: [block[dos], block[dos + 1]],
        }
    }
}

pub struct CbmDos {
    format: Format,
    container: ContainerHandle,
    sectors: Arc<dyn SectorSource>,
    header: Header,
    first_directory: Location,
}

impl CbmDos {
    /// Open a D64, D71, or D81 image.  The image size must match one of
    /// the format's geometries exactly.
    pub fn open_sector_image(container: ContainerHandle, format: Format) -> io::Result<CbmDos> {
        let (geometries, layout): (&'static [Geometry], &HeaderLayout) = match format {
            Format::D64 => (&D64_GEOMETRIES, &HEADER_1541),
            Format::D71 => (&D71_GEOMETRIES, &HEADER_1541),
            Format::D81 => (&D81_GEOMETRIES, &HEADER_1581),
            _ => return Err(MediaError::UnknownFormat.into()),
        };
        let geometry = match Geometry::find_by_size(container.len(), geometries) {
            Some(geometry) => geometry,
            None => return Err(MediaError::UnknownFormat.into()),
        };
        let sectors = Arc::new(LinearSectors::new(container.clone(), geometry));
        Self::open_with(format, container, sectors, layout)
    }

    /// Open a G64 image.
    pub fn open_g64(container: ContainerHandle) -> io::Result<CbmDos> {
        let sectors = GcrSectors::open(container.clone())?;
        debug!(tracks = sectors.tracks(), "G64 track table");
        Self::open_with(Format::G64, container, Arc::new(sectors), &HEADER_1541)
    }

    fn open_with(
        format: Format,
        container: ContainerHandle,
        sectors: Arc<dyn SectorSource>,
        layout: &HeaderLayout,
    ) -> io::Result<CbmDos> {
        let block = sectors.sector(layout.location, &mut Progress::default())?;
        let header = Header::parse(&block, layout);
        Ok(CbmDos {
            format,
            container,
            sectors,
            header,
            first_directory: layout.first_directory,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    fn parse_entry(&self, index: usize, raw: &[u8], progress: &Progress) -> Entry {
        let type_code = raw[ENTRY_TYPE_OFFSET];
        let start = Location::from_bytes(&raw[ENTRY_START_OFFSET..]);
        let raw_name = &raw[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + FILENAME_SIZE];
        let name = petscii::from_padded_bytes(raw_name, PADDING_BYTE);
        let blocks = le16(raw, ENTRY_BLOCKS_OFFSET) as u64;

        let size = match chain::seek_file_size(self.sectors.clone(), start, progress) {
            Ok(size) => size,
            Err(e) => {
                warn!(entry = %name, location = %start, error = %e, "unreadable file chain");
                blocks * CBM_BLOCK_DATA_SIZE
            }
        };

        let mut entry = Entry::new(index, name, size);
        entry.raw_name = raw_name.to_vec();
        entry.type_code = type_code;
        entry.location = Some((start.track(), start.sector()));
        if type_code & 0x07 == FILE_TYPE_REL {
            entry.record_size = Some(raw[ENTRY_RECORD_LENGTH_OFFSET] as u16);
        }
        entry
    }
}

impl FormatHandler for CbmDos {
    fn format(&self) -> Format {
        self.format
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        block::BLOCK_SIZE
    }

    fn label(&self) -> &str {
        &self.header.disk_name
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for sector in ChainIterator::new(self.sectors.clone(), self.first_directory, progress) {
            let sector = sector?;
            for raw in sector.data.chunks_exact(ENTRY_SIZE) {
                let type_code = raw[ENTRY_TYPE_OFFSET];
                // Scratched entries and never-used slots.
                if type_code & FILE_ATTRIB_CLOSED_MASK == 0 && type_code & 0x07 == 0 {
                    continue;
                }
                progress.tick()?;
                let entry = self.parse_entry(entries.len() + 1, raw, progress);
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry, progress: &Progress) -> io::Result<Box<dyn Read + Send>> {
        let (track, sector) = entry.location.ok_or_else(|| MediaError::InvalidLocation.to_io_error())?;
        Ok(Box::new(ChainReader::new(
            self.sectors.clone(),
            Location(track, sector),
            progress,
        )))
    }

    fn decode_type(&self, entry: &Entry) -> String {
        let code = entry.type_code;
        let mut name = String::with_capacity(5);
        if code & FILE_ATTRIB_CLOSED_MASK == 0 {
            name.push('*');
        }
        name.push_str(cbm_type_name(code));
        if code & FILE_ATTRIB_LOCKED_MASK != 0 {
            name.push('<');
        }
        name
    }

    fn seek_file_size(&self, track: u8, sector: u8, progress: &Progress) -> io::Result<u64> {
        chain::seek_file_size(self.sectors.clone(), Location(track, sector), progress)
    }
}
