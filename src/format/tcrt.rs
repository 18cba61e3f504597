//! Tapecart cartridge images.
//!
//! The image wraps a flash dump.  A directory of fixed 32-byte records
//! inside the flash names each stored file along with its flash location,
//! size and load address.  Bundled records hold a complete sub-image (a
//! disk image, say) whose extension is kept in the record's bundle bytes.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::error::MediaError;
use crate::format::{clamp_to_container, with_load_address, Entry, Format, FormatHandler, RangeReader};
use crate::petscii::{self, PADDING_BYTE};
use crate::progress::Progress;
use crate::stream::ContainerHandle;
use crate::util::{le16, le24, le32};

pub const TCRT_SIGNATURE: &[u8] = b"tapecartImage\r\n\x1a";

const VERSION_OFFSET: usize = 0x10;
const NAME_OFFSET: usize = 0x18;
const NAME_SIZE: usize = 16;
const FLASH_LENGTH_OFFSET: usize = 0xD4;
const FLASH_OFFSET: u64 = 0xD8;

const DIRECTORY_OFFSET: u64 = 0x1000;
const DIRECTORY_RECORDS: usize = 128;
const RECORD_SIZE: usize = 32;
const FLASH_PAGE_SIZE: u64 = 256;

const RECORD_TYPE_OFFSET: usize = 0x10;
const RECORD_START_OFFSET: usize = 0x11;
const RECORD_SIZE_OFFSET: usize = 0x13;
const RECORD_LOAD_OFFSET: usize = 0x16;
const RECORD_BUNDLE_OFFSET: usize = 0x18;

const TYPE_DELETED: u8 = 0x00;
const TYPE_PRG: u8 = 0x01;
const TYPE_DATA: u8 = 0x02;
const TYPE_BUNDLE: u8 = 0x03;
const TYPE_END: u8 = 0xFF;

pub struct Tcrt {
    container: ContainerHandle,
    pub version: u16,
    name: String,
    flash_length: u64,
}

impl Tcrt {
    pub fn open(container: ContainerHandle) -> io::Result<Tcrt> {
        let header = container.slice(0, FLASH_OFFSET as usize)?;
        if &header[..TCRT_SIGNATURE.len()] != TCRT_SIGNATURE {
            return Err(MediaError::UnknownFormat.into());
        }
        let version = le16(header, VERSION_OFFSET);
        let name = petscii::from_padded_bytes(
            petscii::trim_padding(&header[NAME_OFFSET..NAME_OFFSET + NAME_SIZE], 0x00),
            PADDING_BYTE,
        );
        let stored_length = le32(header, FLASH_LENGTH_OFFSET) as u64;
        let flash_length = clamp_to_container(&container, FLASH_OFFSET, stored_length);
        if flash_length < stored_length {
            warn!(stored_length, flash_length, "TCRT flash dump is truncated");
        }
        debug!(version, flash_length, "TCRT header");
        Ok(Tcrt {
            container,
            version,
            name,
            flash_length,
        })
    }

    fn flash_record(&self, slot: usize) -> Option<&[u8]> {
        let offset = DIRECTORY_OFFSET + (slot * RECORD_SIZE) as u64;
        if offset + RECORD_SIZE as u64 > self.flash_length {
            return None;
        }
        self.container.slice(FLASH_OFFSET + offset, RECORD_SIZE).ok()
    }
}

/// Bundle bytes 0-3 hold the sub-image's extension, NUL padded.
fn bundle_extension(bundle: &[u8]) -> Option<String> {
    let extension = petscii::trim_padding(&bundle[..4], 0x00);
    if !extension.is_empty() && extension.iter().all(|b| b.is_ascii_alphanumeric()) {
        Some(String::from_utf8_lossy(extension).to_ascii_lowercase())
    } else {
        None
    }
}

impl FormatHandler for Tcrt {
    fn format(&self) -> Format {
        Format::Tcrt
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        FLASH_PAGE_SIZE as usize
    }

    fn media_data_offset(&self) -> u64 {
        FLASH_OFFSET
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for slot in 0..DIRECTORY_RECORDS {
            let record = match self.flash_record(slot) {
                Some(record) => record,
                None => break,
            };
            match record[RECORD_TYPE_OFFSET] {
                TYPE_END => break,
                TYPE_DELETED => continue,
                _ => {}
            }
            progress.tick()?;

            let raw_name = petscii::trim_padding(petscii::trim_padding(&record[..16], 0x00), PADDING_BYTE);
            let name = petscii::to_string(raw_name);
            let type_code = record[RECORD_TYPE_OFFSET];
            let offset = FLASH_OFFSET + le16(record, RECORD_START_OFFSET) as u64 * FLASH_PAGE_SIZE;
            let stored = le24(record, RECORD_SIZE_OFFSET) as u64;
            let data_size = clamp_to_container(&self.container, offset, stored);
            if data_size < stored {
                warn!(entry = %name, stored, data_size, "TCRT entry runs past the flash dump");
            }

            let load_address = match type_code {
                TYPE_PRG => Some(le16(record, RECORD_LOAD_OFFSET)),
                _ => None,
            };
            let size = data_size + if load_address.is_some() { 2 } else { 0 };
            let mut entry = Entry::new(entries.len() + 1, name, size);
            entry.raw_name = raw_name.to_vec();
            entry.type_code = type_code;
            entry.offset = offset;
            entry.load_address = load_address;
            if type_code == TYPE_BUNDLE {
                entry.format_hint = bundle_extension(&record[RECORD_BUNDLE_OFFSET..]);
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry, _progress: &Progress) -> io::Result<Box<dyn Read + Send>> {
        let data_size = entry.size - if entry.load_address.is_some() { 2 } else { 0 };
        Ok(with_load_address(
            entry.load_address,
            RangeReader::new(self.container.clone(), entry.offset, data_size),
        ))
    }

    fn decode_type(&self, entry: &Entry) -> String {
        match entry.type_code {
            TYPE_PRG => "PRG".to_string(),
            TYPE_DATA => "SEQ".to_string(),
            TYPE_BUNDLE => match entry.format_hint {
                Some(ref hint) => hint.to_ascii_uppercase(),
                None => "BND".to_string(),
            },
            code => format!("${:02X}", code),
        }
    }
}
