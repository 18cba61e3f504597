//! Lynx disk archives.
//!
//! An archive begins with a BASIC bootstrap of no fixed length, so the
//! header is found by searching for the `LYNX` marker rather than read from
//! a fixed offset.  The header and the directory that follows it are
//! CR-delimited ASCII; file data follows in 254-byte blocks.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::error::MediaError;
use crate::format::{
    cbm_type_name, clamp_to_container, Entry, Format, FormatHandler, RangeReader, CBM_BLOCK_DATA_SIZE,
};
use crate::petscii::{self, PADDING_BYTE};
use crate::progress::Progress;
use crate::stream::{ContainerCursor, ContainerHandle, Scanner, Seekable};

pub const LNX_SIGNATURE: &[u8] = b"LYNX";
/// How far into the container the signature may appear.
pub const LNX_SCAN_LIMIT: usize = 4 * CBM_BLOCK_DATA_SIZE as usize;

const CR: u8 = b'\r';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LnxHeader {
    pub signature: String,
    pub directory_blocks: u64,
    pub entry_count: usize,
    pub creator: String,
    /// Container offset of the first directory entry.
    directory_start: u64,
    data_start: u64,
}

impl LnxHeader {
    /// Offset of the first file's data.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }
}

pub struct Lnx {
    container: ContainerHandle,
    header: LnxHeader,
}

/// Round up to the next multiple of the 254-byte block size, or `None` if
/// that overflows.
#[inline]
fn block_align(offset: u64) -> Option<u64> {
    let blocks = offset.checked_add(CBM_BLOCK_DATA_SIZE - 1)? / CBM_BLOCK_DATA_SIZE;
    blocks.checked_mul(CBM_BLOCK_DATA_SIZE)
}

/// Bytes stored for an entry of `blocks` blocks whose last block holds
/// `last_used` bytes.
fn stored_size(blocks: u64, last_used: u64) -> Option<u64> {
    blocks
        .saturating_sub(1)
        .checked_mul(CBM_BLOCK_DATA_SIZE)?
        .checked_add(last_used)
}

fn parse_number(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

fn type_code(letter: &str) -> Option<u8> {
    match letter.trim() {
        "D" => Some(0),
        "S" => Some(1),
        "P" => Some(2),
        "U" => Some(3),
        "R" => Some(4),
        _ => None,
    }
}

impl Lnx {
    pub fn open(container: ContainerHandle) -> io::Result<Lnx> {
        let scan = &container.bytes()[..container.bytes().len().min(LNX_SCAN_LIMIT)];
        let marker = scan
            .windows(LNX_SIGNATURE.len())
            .position(|w| w == LNX_SIGNATURE)
            .ok_or_else(|| MediaError::UnknownFormat.to_io_error())?;
        // The signature line runs from the start of its line to the next CR.
        let line_start = scan[..marker]
            .iter()
            .rposition(|&b| b == CR)
            .map(|p| p + 1)
            .unwrap_or(0);

        let mut cursor = ContainerCursor::at(container.clone(), line_start as u64);
        let signature = cursor.read_string_until(CR)?.trim().to_string();
        let directory_blocks = parse_number(&cursor.read_string_until(CR)?)
            .ok_or_else(|| MediaError::InvalidHeader.to_io_error())?;
        let entry_count = parse_number(&cursor.read_string_until(CR)?)
            .ok_or_else(|| MediaError::InvalidHeader.to_io_error())? as usize;
        let creator = cursor.read_string_until(CR)?.trim().to_string();
        if cursor.is_eos() {
            return Err(MediaError::InvalidHeader.into());
        }

        let invalid = || MediaError::InvalidHeader.to_io_error();
        let header = LnxHeader {
            signature,
            directory_blocks,
            entry_count,
            creator,
            directory_start: block_align(cursor.position()).ok_or_else(invalid)?,
            data_start: directory_blocks.checked_mul(CBM_BLOCK_DATA_SIZE).ok_or_else(invalid)?,
        };
        debug!(
            directory_blocks = header.directory_blocks,
            entries = header.entry_count,
            "LNX header"
        );
        Ok(Lnx { container, header })
    }

    pub fn header(&self) -> &LnxHeader {
        &self.header
    }
}

impl FormatHandler for Lnx {
    fn format(&self) -> Format {
        Format::Lnx
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        CBM_BLOCK_DATA_SIZE as usize
    }

    fn media_data_offset(&self) -> u64 {
        self.header.data_start()
    }

    fn label(&self) -> &str {
        &self.header.creator
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        let mut cursor = ContainerCursor::at(self.container.clone(), self.header.directory_start);
        let mut offset = self.header.data_start();
        let max_entries = progress.limits().max_entries;
        if self.header.entry_count > max_entries {
            warn!(entries = self.header.entry_count, max_entries, "LNX entry count exceeds limit");
            return Err(MediaError::ChainTooLong.into());
        }
        let mut entries = Vec::with_capacity(self.header.entry_count);
        let invalid = || MediaError::InvalidLayout.to_io_error();

        // Offsets accumulate, so a single forward pass computes them all.
        for index in 1..=self.header.entry_count {
            progress.tick()?;
            let raw_name = petscii::trim_padding(&cursor.read_until(CR)?, PADDING_BYTE).to_vec();
            let blocks = parse_number(&cursor.read_string_until(CR)?).ok_or_else(invalid)?;
            let type_code = type_code(&cursor.read_string_until(CR)?).ok_or_else(invalid)?;
            let last_used = parse_number(&cursor.read_string_until(CR)?).ok_or_else(invalid)?;
            let record_size = if type_code == 4 {
                Some(parse_number(&cursor.read_string_until(CR)?).ok_or_else(invalid)? as u16)
            } else {
                None
            };

            let stored = stored_size(blocks, last_used).ok_or_else(invalid)?;
            let size = clamp_to_container(&self.container, offset, stored);
            let name = petscii::to_string(&raw_name);
            if size < stored {
                warn!(entry = %name, stored, size, "LNX entry truncated by end of archive");
            }

            let mut entry = Entry::new(index, name, size);
            entry.raw_name = raw_name;
            entry.type_code = type_code;
            entry.offset = offset;
            entry.record_size = record_size;
            entries.push(entry);

            offset = block_align(stored)
                .and_then(|aligned| offset.checked_add(aligned))
                .ok_or_else(invalid)?;
        }
        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry, _progress: &Progress) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(RangeReader::new(
            self.container.clone(),
            entry.offset,
            entry.size,
        )))
    }

    fn decode_type(&self, entry: &Entry) -> String {
        cbm_type_name(entry.type_code).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Container;

    /// A bootstrap, header, and directory for files of the given sizes.
    fn archive(directory_blocks: usize, files: &[(&str, char, u64)]) -> Vec<u8> {
        let mut bytes = vec![0x01, 0x08, 0x5B, 0x08, 0x0A, 0x00, 0x97];
        bytes.extend_from_slice(b"\r 1  *LYNX XV  BY WILL CORLEY\r");
        bytes.extend_from_slice(format!(" {} \r", directory_blocks).as_bytes());
        bytes.extend_from_slice(format!(" {} \r", files.len()).as_bytes());
        bytes.extend_from_slice(b"TESTER\r");
        bytes.resize(254, 0);
        for (name, kind, size) in files {
            let mut padded = name.as_bytes().to_vec();
            padded.resize(16, PADDING_BYTE);
            bytes.extend_from_slice(&padded);
            let blocks = (size + 253) / 254;
            let last = size - (blocks.max(1) - 1) * 254;
            bytes.extend_from_slice(format!("\r {} \r{}\r {} \r", blocks, kind, last).as_bytes());
        }
        bytes.resize(directory_blocks * 254, 0);
        for (i, (_, _, size)) in files.iter().enumerate() {
            let start = bytes.len();
            bytes.resize(start + *size as usize, i as u8 + 1);
            let aligned = (start as u64 + block_align(*size).unwrap()) as usize;
            bytes.resize(aligned, 0);
        }
        bytes
    }

    #[test]
    fn test_header() {
        let lnx = Lnx::open(Container::from_bytes(archive(1, &[])).into_handle()).unwrap();
        assert_eq!(lnx.header().signature, "1  *LYNX XV  BY WILL CORLEY");
        assert_eq!(lnx.header().directory_blocks, 1);
        assert_eq!(lnx.header().entry_count, 0);
        assert_eq!(lnx.label(), "TESTER");
        assert_eq!(lnx.media_data_offset(), 254);
    }

    #[test]
    fn test_entry_offsets_accumulate() {
        let bytes = archive(2, &[("ONE", 'P', 300), ("TWO", 'S', 254), ("THREE", 'U', 1)]);
        let lnx = Lnx::open(Container::from_bytes(bytes).into_handle()).unwrap();
        let entries = lnx.entries(&mut Progress::default()).unwrap();
        let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![508, 508 + 508, 508 + 508 + 254]);
        let sizes: Vec<u64> = entries.iter().map(|e| e.size).collect();
        assert_eq!(sizes, vec![300, 254, 1]);
        assert_eq!(lnx.decode_type(&entries[1]), "SEQ");

        let mut data = vec![];
        lnx.open_entry(&entries[1], &Progress::default())
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, vec![2u8; 254]);
    }

    #[test]
    fn test_missing_signature() {
        let container = Container::from_bytes(vec![0x20u8; 2000]).into_handle();
        assert!(Lnx::open(container).err().unwrap() == MediaError::UnknownFormat);
    }

    #[test]
    fn test_bad_directory_field() {
        let mut bytes = archive(2, &[("ONE", 'P', 10)]);
        // Replace the type letter.
        let p = 254 + 16 + 5;
        assert_eq!(bytes[p], b'P');
        bytes[p] = b'X';
        let lnx = Lnx::open(Container::from_bytes(bytes).into_handle()).unwrap();
        assert!(lnx.entries(&mut Progress::default()).unwrap_err() == MediaError::InvalidLayout);
    }

    #[test]
    fn test_block_align() {
        assert_eq!(block_align(0), Some(0));
        assert_eq!(block_align(1), Some(254));
        assert_eq!(block_align(254), Some(254));
        assert_eq!(block_align(u64::MAX), None);
        assert_eq!(stored_size(u64::MAX, 10), None);
        assert_eq!(stored_size(0, 10), Some(10));
    }

    /// Overwrite the ASCII field that starts at `at` (a space-padded number
    /// between CRs) with `text`, keeping the rest of the archive in place.
    fn patch_field(bytes: &mut Vec<u8>, at: usize, text: &str) {
        let end = at + bytes[at..].iter().position(|&b| b == CR).unwrap();
        bytes.splice(at..end, text.bytes());
    }

    fn field_after(bytes: &[u8], needle: &[u8]) -> usize {
        bytes.windows(needle.len()).position(|w| w == needle).unwrap() + needle.len()
    }

    #[test]
    fn test_huge_block_count() {
        let mut bytes = archive(2, &[("ONE", 'P', 10), ("TWO", 'P', 10)]);
        let at = field_after(&bytes, b"ONE\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\r");
        patch_field(&mut bytes, at, "100000000000000000");
        let lnx = Lnx::open(Container::from_bytes(bytes).into_handle()).unwrap();
        assert!(lnx.entries(&mut Progress::default()).unwrap_err() == MediaError::InvalidLayout);
    }

    #[test]
    fn test_offset_overflow() {
        // Each entry fits, but their sum runs past u64.
        let mut bytes = archive(2, &[("ONE", 'P', 10), ("TWO", 'P', 10)]);
        let big = (u64::MAX / CBM_BLOCK_DATA_SIZE).to_string();
        let at = field_after(&bytes, b"ONE\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\xA0\r");
        patch_field(&mut bytes, at, &big);
        let lnx = Lnx::open(Container::from_bytes(bytes).into_handle()).unwrap();
        assert!(lnx.entries(&mut Progress::default()).unwrap_err() == MediaError::InvalidLayout);
    }

    #[test]
    fn test_huge_directory_block_count() {
        let mut bytes = archive(1, &[]);
        let at = field_after(&bytes, b"CORLEY\r");
        patch_field(&mut bytes, at, "100000000000000000");
        let error = Lnx::open(Container::from_bytes(bytes).into_handle()).err().unwrap();
        assert!(error == MediaError::InvalidHeader);
    }

    #[test]
    fn test_huge_entry_count() {
        let mut bytes = archive(1, &[]);
        let at = field_after(&bytes, b"CORLEY\r 1 \r");
        patch_field(&mut bytes, at, "100000000000000000");
        let lnx = Lnx::open(Container::from_bytes(bytes).into_handle()).unwrap();
        assert_eq!(lnx.header().entry_count, 100_000_000_000_000_000);
        assert!(lnx.entries(&mut Progress::default()).unwrap_err() == MediaError::ChainTooLong);
    }
}
