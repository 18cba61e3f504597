use std::fmt;
use std::io;

use crate::error::MediaError;
use crate::gcr::{self, GcrTrack, SECTOR_SIZE};
use crate::progress::Progress;
use crate::stream::ContainerHandle;
use crate::util::{le16, le32};

pub const BLOCK_SIZE: usize = SECTOR_SIZE;

/// A track and sector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location(pub u8, pub u8);

impl Location {
    #[inline]
    pub fn new(track: u8, sector: u8) -> Location {
        Location(track, sector)
    }

    #[inline]
    pub fn track(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn sector(&self) -> u8 {
        self.1
    }

    /// Read a location from the first two bytes of a slice.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Location {
        Location(bytes[0], bytes[1])
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Anything that can produce the 256-byte contents of a track and sector.
pub trait SectorSource: Send + Sync {
    fn sector(&self, location: Location, progress: &mut Progress) -> io::Result<[u8; BLOCK_SIZE]>;
}

/// The track layout of a sector image: how many tracks it has, how many
/// sectors each track holds, and whether a one-byte-per-sector error table
/// follows the data.
pub struct Geometry {
    pub tracks: u8,
    layout: fn(u8) -> u8,
    pub with_error_table: bool,
}

fn layout_1541(track: u8) -> u8 {
    gcr::sectors_per_track(track)
}

/// The 1571 repeats the 1541 zones on its second side.
fn layout_1571(track: u8) -> u8 {
    if track > 35 {
        gcr::sectors_per_track(track - 35)
    } else {
        gcr::sectors_per_track(track)
    }
}

fn layout_1581(_track: u8) -> u8 {
    40
}

pub static D64_GEOMETRIES: [Geometry; 4] = [
    Geometry { tracks: 35, layout: layout_1541, with_error_table: false },
    Geometry { tracks: 35, layout: layout_1541, with_error_table: true },
    Geometry { tracks: 40, layout: layout_1541, with_error_table: false },
    Geometry { tracks: 40, layout: layout_1541, with_error_table: true },
];

pub static D71_GEOMETRIES: [Geometry; 2] = [
    Geometry { tracks: 70, layout: layout_1571, with_error_table: false },
    Geometry { tracks: 70, layout: layout_1571, with_error_table: true },
];

pub static D81_GEOMETRIES: [Geometry; 2] = [
    Geometry { tracks: 80, layout: layout_1581, with_error_table: false },
    Geometry { tracks: 80, layout: layout_1581, with_error_table: true },
];

impl Geometry {
    /// Given a disk image file size, return the first matching geometry.
    pub fn find_by_size(size: u64, geometries: &'static [Geometry]) -> Option<&'static Geometry> {
        geometries.iter().find(|g| g.size() == size)
    }

    /// Sectors on `track`, or 0 if the track doesn't exist.
    #[inline]
    pub fn sectors(&self, track: u8) -> u8 {
        if track == 0 || track > self.tracks {
            0
        } else {
            (self.layout)(track)
        }
    }

    fn total_sectors(&self) -> u64 {
        (1..=self.tracks).map(|t| self.sectors(t) as u64).sum()
    }

    /// Size of an image with this geometry, including the error table if
    /// there is one.
    pub fn size(&self) -> u64 {
        let sectors = self.total_sectors();
        let error_table = if self.with_error_table { sectors } else { 0 };
        sectors * BLOCK_SIZE as u64 + error_table
    }

    /// Byte offset of a sector within the image.
    pub fn offset(&self, location: Location) -> io::Result<u64> {
        let Location(track, sector) = location;
        if sector >= self.sectors(track) {
            return Err(MediaError::InvalidLocation.into());
        }
        let preceding: u64 = (1..track).map(|t| self.sectors(t) as u64).sum();
        Ok((preceding + sector as u64) * BLOCK_SIZE as u64)
    }
}

/// Sectors stored back to back in track order, as in D64/D71/D81 images.
pub struct LinearSectors {
    container: ContainerHandle,
    geometry: &'static Geometry,
}

impl LinearSectors {
    pub fn new(container: ContainerHandle, geometry: &'static Geometry) -> LinearSectors {
        LinearSectors { container, geometry }
    }
}

impl SectorSource for LinearSectors {
    fn sector(&self, location: Location, _progress: &mut Progress) -> io::Result<[u8; BLOCK_SIZE]> {
        let offset = self.geometry.offset(location)?;
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(self.container.slice(offset, BLOCK_SIZE)?);
        Ok(block)
    }
}

pub const G64_SIGNATURE: &[u8] = b"GCR-1541";
const G64_HALF_TRACKS_OFFSET: usize = 0x09;
const G64_MAX_TRACK_SIZE_OFFSET: usize = 0x0A;
const G64_TRACK_TABLE_OFFSET: usize = 0x0C;

/// Raw GCR tracks, as in G64 images.  Each sector read scans its track for
/// the wanted header.
pub struct GcrSectors {
    container: ContainerHandle,
    track_offsets: Vec<u32>,
    max_track_size: u16,
}

impl GcrSectors {
    /// Parse the G64 header and half-track offset table.
    pub fn open(container: ContainerHandle) -> io::Result<GcrSectors> {
        let header = container.slice(0, G64_TRACK_TABLE_OFFSET)?;
        if &header[..G64_SIGNATURE.len()] != G64_SIGNATURE {
            return Err(MediaError::UnknownFormat.into());
        }
        let half_tracks = header[G64_HALF_TRACKS_OFFSET] as usize;
        let max_track_size = le16(header, G64_MAX_TRACK_SIZE_OFFSET);
        let table = container
            .slice(G64_TRACK_TABLE_OFFSET as u64, half_tracks * 4)
            .map_err(|_| MediaError::InvalidHeader.to_io_error())?;
        let track_offsets = (0..half_tracks).map(|i| le32(table, i * 4)).collect();
        Ok(GcrSectors {
            container,
            track_offsets,
            max_track_size,
        })
    }

    /// Number of whole tracks the offset table has room for.
    pub fn tracks(&self) -> u8 {
        ((self.track_offsets.len() + 1) / 2).min(u8::MAX as usize) as u8
    }

    pub fn max_track_size(&self) -> u16 {
        self.max_track_size
    }

    /// Return the raw GCR bytes of a whole track.
    pub fn track_data(&self, track: u8) -> io::Result<&[u8]> {
        if track == 0 {
            return Err(MediaError::InvalidLocation.into());
        }
        let half_track = (track as usize - 1) * 2;
        let offset = match self.track_offsets.get(half_track) {
            Some(&offset) if offset != 0 => offset as u64,
            _ => return Err(MediaError::InvalidLocation.into()),
        };
        let length = le16(self.container.slice(offset, 2)?, 0) as usize;
        self.container.slice(offset + 2, length)
    }
}

impl SectorSource for GcrSectors {
    fn sector(&self, location: Location, progress: &mut Progress) -> io::Result<[u8; BLOCK_SIZE]> {
        let Location(track, sector) = location;
        if sector >= gcr::sectors_per_track(track) {
            return Err(MediaError::InvalidLocation.into());
        }
        let track_data = GcrTrack::new(self.track_data(track)?);
        Ok(track_data.find_sector(track, sector, progress)?.data)
    }
}
