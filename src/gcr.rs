//! Group Code Recording (GCR) as written by the 1541 drive.
//!
//! Each 4-bit nibble is stored as a 5-bit code chosen so that no more than
//! two zero bits ever occur in a row, so four plain bytes occupy five bytes
//! on the media.  A track is a circular run of these bytes with no index:
//! sectors are found by waiting for a sync mark (ten or more one-bits),
//! decoding the header that follows, and repeating until the header names
//! the wanted sector.  Data blocks follow their header after a second sync.
//!
//! Decoding is best-effort.  A code that maps to no nibble is what a real
//! drive reports as a read error, and the partially decoded bytes are still
//! handed back to the caller along with a count of how many were good.

use std::io;

use tracing::warn;

use crate::error::MediaError;
use crate::progress::Progress;

pub const SECTOR_SIZE: usize = 256;

/// Size of the GCR-encoded sector header block (8 plain bytes).
pub const HEADER_GCR_SIZE: usize = 10;
/// Size of the GCR-encoded data block (260 plain bytes: marker, 256 data
/// bytes, checksum, and two off bytes).
pub const DATA_GCR_SIZE: usize = 325;

pub const HEADER_BLOCK_ID: u8 = 0x08;
pub const DATA_BLOCK_ID: u8 = 0x07;

const INVALID: u8 = 0xFF;

/// Nibble to 5-bit GCR code.
#[rustfmt::skip]
static GCR_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17,
    0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];

/// 5-bit GCR code to high nibble (already shifted), or `INVALID`.
#[rustfmt::skip]
static GCR_DECODE_HIGH: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x80, 0x00, 0x10, 0xFF, 0xC0, 0x40, 0x50,
    0xFF, 0xFF, 0x20, 0x30, 0xFF, 0xF0, 0x60, 0x70,
    0xFF, 0x90, 0xA0, 0xB0, 0xFF, 0xD0, 0xE0, 0xFF,
];

/// 5-bit GCR code to low nibble, or `INVALID`.
#[rustfmt::skip]
static GCR_DECODE_LOW: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x08, 0x00, 0x01, 0xFF, 0x0C, 0x04, 0x05,
    0xFF, 0xFF, 0x02, 0x03, 0xFF, 0x0F, 0x06, 0x07,
    0xFF, 0x09, 0x0A, 0x0B, 0xFF, 0x0D, 0x0E, 0xFF,
];

/// The result of decoding one 5-byte GCR group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcrGroup {
    pub bytes: [u8; 4],
    /// The number of leading bytes that decoded cleanly.  This is 4 unless
    /// the group contains an undecodable code.
    pub converted: usize,
}

impl GcrGroup {
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.converted < 4
    }
}

/// Decode 5 GCR bytes (eight 5-bit codes) into 4 plain bytes.
pub fn convert_4_bytes_from_gcr(gcr: &[u8; 5]) -> GcrGroup {
    let codes: [u8; 8] = [
        gcr[0] >> 3,
        ((gcr[0] << 2) | (gcr[1] >> 6)) & 0x1F,
        (gcr[1] >> 1) & 0x1F,
        ((gcr[1] << 4) | (gcr[2] >> 4)) & 0x1F,
        ((gcr[2] << 1) | (gcr[3] >> 7)) & 0x1F,
        (gcr[3] >> 2) & 0x1F,
        ((gcr[3] << 3) | (gcr[4] >> 5)) & 0x1F,
        gcr[4] & 0x1F,
    ];

    let mut group = GcrGroup {
        bytes: [0; 4],
        converted: 4,
    };
    for (i, pair) in codes.chunks(2).enumerate() {
        let high = GCR_DECODE_HIGH[pair[0] as usize];
        let low = GCR_DECODE_LOW[pair[1] as usize];
        if (high == INVALID || low == INVALID) && group.converted == 4 {
            group.converted = i;
        }
        group.bytes[i] = high | low;
    }
    group
}

/// Encode 4 plain bytes into 5 GCR bytes.
pub fn convert_4_bytes_to_gcr(plain: &[u8; 4]) -> [u8; 5] {
    let bits = plain.iter().fold(0u64, |bits, &b| {
        (bits << 10)
            | ((GCR_ENCODE[(b >> 4) as usize] as u64) << 5)
            | GCR_ENCODE[(b & 0x0F) as usize] as u64
    });
    [
        (bits >> 32) as u8,
        (bits >> 24) as u8,
        (bits >> 16) as u8,
        (bits >> 8) as u8,
        bits as u8,
    ]
}

/// Encode a run of plain bytes.  The length must be a multiple of four.
pub fn encode(plain: &[u8]) -> io::Result<Vec<u8>> {
    if plain.len() % 4 != 0 {
        return Err(MediaError::InvalidLayout.into());
    }
    Ok(plain
        .chunks_exact(4)
        .flat_map(|chunk| convert_4_bytes_to_gcr(&[chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decode `groups` consecutive GCR groups starting at `gcr[0]`.  Returns the
/// plain bytes and the number of leading bytes decoded without error, or
/// None if the buffer is too short.
fn decode_groups(gcr: &[u8], groups: usize) -> Option<(Vec<u8>, usize)> {
    if gcr.len() < groups * 5 {
        return None;
    }
    let mut plain = Vec::with_capacity(groups * 4);
    let mut converted: Option<usize> = None;
    for chunk in gcr[..groups * 5].chunks(5) {
        let group = convert_4_bytes_from_gcr(&[chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]]);
        if group.is_bad() && converted.is_none() {
            converted = Some(plain.len() + group.converted);
        }
        plain.extend_from_slice(&group.bytes);
    }
    let good = converted.unwrap_or(plain.len());
    Some((plain, good))
}

/// Return the number of sectors the 1541 writes on `track`, according to
/// its speed zone, or 0 for a track outside the drive's range.
pub fn sectors_per_track(track: u8) -> u8 {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        31..=42 => 17,
        _ => 0,
    }
}

/// Scan forward from `start` for a sync mark: the low two bits of one byte
/// and all eight bits of the next set (ten one-bits), followed by any number
/// of further 0xFF fill bytes.  Returns the position of the first byte after
/// the sync, or None when the end of the buffer is reached.
pub fn find_sync(gcr: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    loop {
        if pos + 1 >= gcr.len() {
            return None;
        }
        if gcr[pos] & 0x03 == 0x03 && gcr[pos + 1] == 0xFF {
            break;
        }
        pos += 1;
    }
    pos += 1;
    while pos < gcr.len() && gcr[pos] == 0xFF {
        pos += 1;
    }
    if pos < gcr.len() {
        Some(pos)
    } else {
        None
    }
}

/// A decoded sector header block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorHeader {
    pub code: u8,
    pub checksum: u8,
    pub sector: u8,
    pub track: u8,
    pub id1: u8,
    pub id0: u8,
    /// False if any byte failed to decode.
    pub clean: bool,
}

impl SectorHeader {
    #[inline]
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.sector ^ self.track ^ self.id1 ^ self.id0
    }
}

/// Decode the header block at `pos` (just after a sync mark).
pub fn read_sector_header(gcr: &[u8], pos: usize) -> Option<SectorHeader> {
    let (plain, good) = decode_groups(gcr.get(pos..)?, 2)?;
    Some(SectorHeader {
        code: plain[0],
        checksum: plain[1],
        sector: plain[2],
        track: plain[3],
        id1: plain[4],
        id0: plain[5],
        clean: good == plain.len(),
    })
}

/// A decoded sector data block.
#[derive(Clone, Debug)]
pub struct SectorData {
    pub data: [u8; SECTOR_SIZE],
    /// The number of leading data bytes decoded without a GCR error.
    pub converted: usize,
    pub checksum_ok: bool,
}

impl SectorData {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.converted == SECTOR_SIZE && self.checksum_ok
    }
}

/// Decode the data block at `pos` (just after the sync mark that follows a
/// header).  Returns None if the block is truncated or doesn't carry the
/// data block marker.
pub fn read_sector_data(gcr: &[u8], pos: usize) -> Option<SectorData> {
    let (plain, good) = decode_groups(gcr.get(pos..)?, DATA_GCR_SIZE / 5)?;
    if plain[0] != DATA_BLOCK_ID {
        return None;
    }
    let mut data = [0u8; SECTOR_SIZE];
    data.copy_from_slice(&plain[1..1 + SECTOR_SIZE]);
    let checksum = data.iter().fold(0u8, |acc, b| acc ^ b);
    Some(SectorData {
        data,
        // The marker byte doesn't count towards the sector's data.
        converted: good.saturating_sub(1).min(SECTOR_SIZE),
        checksum_ok: checksum == plain[1 + SECTOR_SIZE],
    })
}

/// One track's worth of GCR bytes.  The track is circular, so the buffer is
/// held twice over to let a header or data block that straddles the end of
/// the recorded data be decoded without special cases.
pub struct GcrTrack {
    bytes: Vec<u8>,
    len: usize,
}

impl GcrTrack {
    pub fn new(gcr: &[u8]) -> GcrTrack {
        let mut bytes = Vec::with_capacity(gcr.len() * 2);
        bytes.extend_from_slice(gcr);
        bytes.extend_from_slice(gcr);
        GcrTrack {
            bytes,
            len: gcr.len(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Scan one revolution of the track for the header of (`track`,
    /// `sector`) and decode the data block that follows it.  Headers are
    /// checked in physical order and the first match wins, as on a drive.
    pub fn find_sector(
        &self,
        track: u8,
        sector: u8,
        progress: &mut Progress,
    ) -> io::Result<SectorData> {
        let mut pos = 0;
        let mut header_found = false;
        while pos < self.len {
            progress.tick()?;
            let after_sync = match find_sync(&self.bytes, pos) {
                Some(p) => p,
                None => break,
            };
            pos = after_sync;

            let header = match read_sector_header(&self.bytes, after_sync) {
                Some(header) if header.code == HEADER_BLOCK_ID => header,
                _ => continue,
            };
            if header.track != track || header.sector != sector {
                continue;
            }
            header_found = true;
            if !header.clean || !header.checksum_ok() {
                warn!(track, sector, "sector header checksum mismatch");
            }

            let data_start = match find_sync(&self.bytes, after_sync + HEADER_GCR_SIZE) {
                Some(p) => p,
                None => continue,
            };
            match read_sector_data(&self.bytes, data_start) {
                Some(data) => {
                    if !data.is_clean() {
                        warn!(
                            track,
                            sector,
                            converted = data.converted,
                            checksum_ok = data.checksum_ok,
                            "damaged sector data"
                        );
                    }
                    return Ok(data);
                }
                None => continue,
            }
        }
        if header_found {
            Err(MediaError::BadGcr.into())
        } else {
            Err(MediaError::InvalidLocation.into())
        }
    }
}

/// Build the plain 8-byte header block for a sector.
pub fn header_block(track: u8, sector: u8, id1: u8, id0: u8) -> [u8; 8] {
    [
        HEADER_BLOCK_ID,
        sector ^ track ^ id1 ^ id0,
        sector,
        track,
        id1,
        id0,
        0x0F,
        0x0F,
    ]
}

/// Build the plain 260-byte data block for a sector.
pub fn data_block(data: &[u8; SECTOR_SIZE]) -> Vec<u8> {
    let mut block = Vec::with_capacity(DATA_GCR_SIZE / 5 * 4);
    block.push(DATA_BLOCK_ID);
    block.extend_from_slice(data);
    block.push(data.iter().fold(0u8, |acc, b| acc ^ b));
    block.extend_from_slice(&[0, 0]);
    block
}
