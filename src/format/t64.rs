//! T64 tape images.

use std::io::{self, Read};

use tracing::warn;

use crate::error::MediaError;
use crate::format::{cbm_type_name, with_load_address, Entry, Format, FormatHandler, RangeReader};
use crate::petscii::{self, PADDING_BYTE};
use crate::progress::Progress;
use crate::stream::ContainerHandle;
use crate::util::{le16, le32};

pub const T64_SIGNATURE: &[u8] = b"C64";

const HEADER_SIZE: usize = 0x40;
const RECORD_SIZE: usize = 0x20;
const VERSION_OFFSET: usize = 0x20;
const MAX_ENTRIES_OFFSET: usize = 0x22;
const USED_ENTRIES_OFFSET: usize = 0x24;
const TAPE_NAME_OFFSET: usize = 0x28;
const TAPE_NAME_SIZE: usize = 24;

const RECORD_TYPE_FREE: u8 = 0x00;
const RECORD_FILE_TYPE_OFFSET: usize = 0x01;
const RECORD_START_OFFSET: usize = 0x02;
const RECORD_END_OFFSET: usize = 0x04;
const RECORD_DATA_OFFSET: usize = 0x08;
const RECORD_NAME_OFFSET: usize = 0x10;
const RECORD_NAME_SIZE: usize = 16;

pub struct T64 {
    container: ContainerHandle,
    pub version: u16,
    pub max_entries: u16,
    pub used_entries: u16,
    tape_name: String,
}

/// Tape names are padded with either spaces or shifted spaces.
fn trim_name(bytes: &[u8]) -> &[u8] {
    let bytes = petscii::trim_padding(bytes, PADDING_BYTE);
    let bytes = petscii::trim_padding(bytes, b' ');
    petscii::trim_padding(bytes, 0x00)
}

impl T64 {
    pub fn open(container: ContainerHandle) -> io::Result<T64> {
        let header = container.slice(0, HEADER_SIZE)?;
        if &header[..T64_SIGNATURE.len()] != T64_SIGNATURE {
            return Err(MediaError::UnknownFormat.into());
        }
        let tape_name = petscii::to_string(trim_name(
            &header[TAPE_NAME_OFFSET..TAPE_NAME_OFFSET + TAPE_NAME_SIZE],
        ));
        let version = le16(header, VERSION_OFFSET);
        let max_entries = le16(header, MAX_ENTRIES_OFFSET);
        let used_entries = le16(header, USED_ENTRIES_OFFSET);
        Ok(T64 {
            container,
            version,
            max_entries,
            used_entries,
            tape_name,
        })
    }
}

impl FormatHandler for T64 {
    fn format(&self) -> Format {
        Format::T64
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        RECORD_SIZE
    }

    fn media_data_offset(&self) -> u64 {
        HEADER_SIZE as u64
    }

    fn label(&self) -> &str {
        &self.tape_name
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        // Some tools leave the used count at zero; fall back to scanning
        // every record slot.
        let records = match self.used_entries {
            0 => self.max_entries,
            n => n.max(self.max_entries),
        } as usize;
        let mut entries = Vec::new();
        for slot in 0..records {
            let offset = (HEADER_SIZE + slot * RECORD_SIZE) as u64;
            let record = match self.container.slice(offset, RECORD_SIZE) {
                Ok(record) => record,
                // The record table ran past the end of the tape.
                Err(_) => break,
            };
            if record[0] == RECORD_TYPE_FREE {
                continue;
            }
            progress.tick()?;

            let start = le16(record, RECORD_START_OFFSET);
            let mut end = le16(record, RECORD_END_OFFSET);
            let data_offset = le32(record, RECORD_DATA_OFFSET) as u64;
            let raw_name = trim_name(&record[RECORD_NAME_OFFSET..RECORD_NAME_OFFSET + RECORD_NAME_SIZE]);
            let name = petscii::to_string(raw_name);

            let available = self.container.len().saturating_sub(data_offset);
            let stored = (end as u64).saturating_sub(start as u64);
            if end < start || stored > available {
                // A well-known tool bug writes $C3C6 as every end address.
                warn!(entry = %name, start, end, "clamping T64 end address");
                end = (start as u64 + available).min(u16::MAX as u64) as u16;
            }
            let data_size = (end - start) as u64;

            let mut entry = Entry::new(entries.len() + 1, name, data_size + 2);
            entry.raw_name = raw_name.to_vec();
            entry.type_code = record[RECORD_FILE_TYPE_OFFSET];
            entry.offset = data_offset;
            entry.load_address = Some(start);
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
        // Entries without a CBM type byte are memory snapshots, which load
        // like programs.
        match entry.type_code {
            0 => "PRG".to_string(),
            code => cbm_type_name(code).to_string(),
        }
    }
}
