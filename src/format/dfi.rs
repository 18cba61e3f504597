//! DFI hard-disk filesystem images.
//!
//! The image is a sequence of 512-byte sectors.  Sector 0 carries the
//! signature and a `Pointer` to the partition directory; each native
//! partition keeps its allocation bitmap, deleted-entry sector and root
//! directory in its first three sectors.  Directory sectors hold 16 fixed
//! entries and chain to the next directory sector through a trailing
//! pointer.
//!
//! Only direct data pointers are resolved.  Files stored through an
//! indirect data tree, and subdirectories, are listed but marked partial.

use std::collections::HashSet;
use std::io::{self, Read};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::error::MediaError;
use crate::format::{clamp_to_container, Entry, EntryKind, Format, FormatHandler, RangeReader};
use crate::petscii::{self, PADDING_BYTE};
use crate::progress::Progress;
use crate::stream::ContainerHandle;
use crate::util::{le24, le32};

pub const SECTOR_SIZE: usize = 512;
pub const DFI_SIGNATURE: &[u8] = b"DFIMAGE";

const PARTITION_DIRECTORY_OFFSET: usize = 0x08;
const HEADS_OFFSET: usize = 0x0C;
const SECTORS_PER_TRACK_OFFSET: usize = 0x0D;

const SLOT_SIZE: usize = 32;

const PARTITION_NATIVE: u8 = 0x01;
const PARTITION_NAME_OFFSET: usize = 0x01;
const PARTITION_NAME_SIZE: usize = 16;
const PARTITION_START_OFFSET: usize = 0x11;
const PARTITION_END_OFFSET: usize = 0x15;
/// Bitmap and deleted-entry sectors precede the root directory.
const ROOT_DIRECTORY_SECTOR: u64 = 2;

const ENTRY_NAME_SIZE: usize = 8;
const ENTRY_SIZE_OFFSET: usize = 0x08;
const ENTRY_POINTER_OFFSET: usize = 0x0C;
const ENTRY_ATTRIBUTE_OFFSET: usize = 0x10;
const ENTRY_TIMESTAMP_OFFSET: usize = 0x11;
const ENTRY_TYPE_EXTRA_OFFSET: usize = 0x15;
const NEXT_DIRECTORY_OFFSET: usize = 0x1FC;

const ATTRIB_CLOSED: u8 = 0x80;
const ATTRIB_DELETABLE: u8 = 0x40;
const ATTRIB_READABLE: u8 = 0x20;
const ATTRIB_WRITABLE: u8 = 0x10;
const ATTRIB_EXECUTABLE: u8 = 0x08;
const ATTRIB_TYPE_MASK: u8 = 0x07;
const TYPE_DIR: u8 = 5;

const POINTER_LBA: u8 = 0x80;
const POINTER_INDIRECT: u8 = 0x40;

/// Cylinder/head/sector geometry from the boot sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chs {
    pub heads: u8,
    pub sectors_per_track: u8,
}

/// A packed 4-byte sector address: one flag byte and three address bytes,
/// either a 24-bit LBA or a cylinder, head and 1-based sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pointer {
    pub flags: u8,
    pub address: [u8; 3],
}

impl Pointer {
    pub fn from_bytes(bytes: &[u8]) -> Pointer {
        Pointer {
            flags: bytes[0],
            address: [bytes[1], bytes[2], bytes[3]],
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.flags == 0 && self.address == [0, 0, 0]
    }

    #[inline]
    pub fn is_lba(&self) -> bool {
        self.flags & POINTER_LBA != 0
    }

    /// The pointer addresses a tree of data pointers rather than the data.
    #[inline]
    pub fn is_indirect(&self) -> bool {
        self.flags & POINTER_INDIRECT != 0
    }

    /// Resolve to a logical block address.
    pub fn lba(&self, chs: Chs) -> io::Result<u64> {
        if self.is_lba() {
            return Ok(le24(&self.address, 0) as u64);
        }
        let [cylinder, head, sector] = self.address;
        if sector == 0 || sector > chs.sectors_per_track || head >= chs.heads {
            return Err(MediaError::InvalidLocation.into());
        }
        let track = cylinder as u64 * chs.heads as u64 + head as u64;
        Ok(track * chs.sectors_per_track as u64 + (sector - 1) as u64)
    }
}

/// Decode a packed directory timestamp: bits 0-5 second, 6-11 minute,
/// 12-16 hour, 17-21 day, 22-25 month, 26-31 years since 1980.  Returns
/// None for an impossible date.
pub fn decode_timestamp(packed: u32) -> Option<NaiveDateTime> {
    let second = packed & 0x3F;
    let minute = (packed >> 6) & 0x3F;
    let hour = (packed >> 12) & 0x1F;
    let day = (packed >> 17) & 0x1F;
    let month = (packed >> 22) & 0x0F;
    let year = 1980 + (packed >> 26) as i32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub slot: usize,
    pub kind: u8,
    pub name: String,
    pub start: Pointer,
    pub end: Pointer,
}

pub struct Dfi {
    container: ContainerHandle,
    chs: Chs,
    partitions: Vec<Partition>,
    /// Index into `partitions` of the partition being served.
    active: usize,
    root_directory: u64,
}

fn trim_name(bytes: &[u8]) -> &[u8] {
    let bytes = petscii::trim_padding(bytes, 0x00);
    let bytes = petscii::trim_padding(bytes, PADDING_BYTE);
    petscii::trim_padding(bytes, b' ')
}

impl Dfi {
    pub fn open(container: ContainerHandle) -> io::Result<Dfi> {
        let boot = container.slice(0, SECTOR_SIZE)?;
        if &boot[..DFI_SIGNATURE.len()] != DFI_SIGNATURE {
            return Err(MediaError::UnknownFormat.into());
        }
        let chs = Chs {
            heads: boot[HEADS_OFFSET],
            sectors_per_track: boot[SECTORS_PER_TRACK_OFFSET],
        };
        let pointer = Pointer::from_bytes(&boot[PARTITION_DIRECTORY_OFFSET..]);
        if pointer.is_null() {
            return Err(MediaError::InvalidHeader.into());
        }
        let directory = container
            .slice(pointer.lba(chs)? * SECTOR_SIZE as u64, SECTOR_SIZE)
            .map_err(|_| MediaError::InvalidHeader.to_io_error())?;

        let partitions: Vec<Partition> = directory
            .chunks_exact(SLOT_SIZE)
            .enumerate()
            .filter(|(_, slot)| slot[0] != 0x00)
            .map(|(index, slot)| Partition {
                slot: index,
                kind: slot[0],
                name: petscii::to_string(trim_name(
                    &slot[PARTITION_NAME_OFFSET..PARTITION_NAME_OFFSET + PARTITION_NAME_SIZE],
                )),
                start: Pointer::from_bytes(&slot[PARTITION_START_OFFSET..]),
                end: Pointer::from_bytes(&slot[PARTITION_END_OFFSET..]),
            })
            .collect();
        let active = partitions
            .iter()
            .position(|p| p.kind == PARTITION_NATIVE)
            .ok_or_else(|| MediaError::InvalidLayout.to_io_error())?;
        for foreign in partitions.iter().filter(|p| p.kind != PARTITION_NATIVE) {
            debug!(slot = foreign.slot, kind = foreign.kind, "skipping foreign partition");
        }
        let root_directory = partitions[active].start.lba(chs)? + ROOT_DIRECTORY_SECTOR;
        debug!(
            partition = %partitions[active].name,
            root_directory,
            "DFI partition"
        );
        Ok(Dfi {
            container,
            chs,
            partitions,
            active,
            root_directory,
        })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn geometry(&self) -> Chs {
        self.chs
    }

    fn parse_entry(&self, index: usize, raw: &[u8]) -> Entry {
        let raw_name = trim_name(&raw[..ENTRY_NAME_SIZE]);
        let name = petscii::to_string(raw_name);
        let attributes = raw[ENTRY_ATTRIBUTE_OFFSET];
        let pointer = Pointer::from_bytes(&raw[ENTRY_POINTER_OFFSET..]);
        let stored = le32(raw, ENTRY_SIZE_OFFSET) as u64;

        let mut entry = Entry::new(index, name, stored);
        entry.raw_name = raw_name.to_vec();
        entry.type_code = attributes;
        entry.timestamp = decode_timestamp(le32(raw, ENTRY_TIMESTAMP_OFFSET));
        entry.record_size = match raw[ENTRY_TYPE_EXTRA_OFFSET] {
            0 => None,
            extra => Some(extra as u16),
        };
        if attributes & ATTRIB_TYPE_MASK == TYPE_DIR {
            entry.kind = EntryKind::Directory;
            entry.partial = true;
        } else if pointer.is_indirect() {
            entry.partial = true;
        } else if pointer.is_null() {
            entry.size = 0;
        } else {
            match pointer.lba(self.chs) {
                Ok(lba) => {
                    entry.offset = lba * SECTOR_SIZE as u64;
                    entry.size = clamp_to_container(&self.container, entry.offset, stored);
                    if entry.size < stored {
                        warn!(entry = %entry.name, stored, size = entry.size, "DFI file runs past the image");
                    }
                }
                Err(_) => {
                    warn!(entry = %entry.name, ?pointer, "unresolvable DFI data pointer");
                    entry.partial = true;
                }
            }
        }
        entry
    }
}

impl FormatHandler for Dfi {
    fn format(&self) -> Format {
        Format::Dfi
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn case_sensitive(&self) -> bool {
        false
    }

    fn label(&self) -> &str {
        &self.partitions[self.active].name
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut chain = progress.bounded(progress.limits().max_chain_blocks);
        let mut visited = HashSet::new();
        let mut next = Some(self.root_directory);
        while let Some(lba) = next.take() {
            chain.tick()?;
            if !visited.insert(lba) {
                return Err(MediaError::ChainLoop.into());
            }
            let sector = self.container.slice(lba * SECTOR_SIZE as u64, SECTOR_SIZE)?;
            for raw in sector.chunks_exact(SLOT_SIZE) {
                if raw[0] == 0x00 {
                    continue;
                }
                progress.tick()?;
                entries.push(self.parse_entry(entries.len() + 1, raw));
            }
            let link = Pointer::from_bytes(&sector[NEXT_DIRECTORY_OFFSET..]);
            if !link.is_null() {
                next = Some(link.lba(self.chs)?);
            }
        }
        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry, _progress: &Progress) -> io::Result<Box<dyn Read + Send>> {
        if entry.partial {
            return Err(MediaError::Partial.into());
        }
        Ok(Box::new(RangeReader::new(
            self.container.clone(),
            entry.offset,
            entry.size,
        )))
    }

    fn decode_type(&self, entry: &Entry) -> String {
        let attributes = entry.type_code;
        let mut name = String::with_capacity(8);
        if attributes & ATTRIB_CLOSED == 0 {
            name.push('*');
        }
        name.push_str(match attributes & ATTRIB_TYPE_MASK {
            0 => "DEL",
            1 => "SEQ",
            2 => "PRG",
            3 => "USR",
            4 => "REL",
            5 => "DIR",
            _ => "???",
        });
        if attributes & ATTRIB_DELETABLE == 0 {
            name.push('<');
        }
        name
    }
}

/// Render the permission bits as `rwxd` with dashes for cleared bits.
pub fn permissions(attributes: u8) -> String {
    [
        (ATTRIB_READABLE, 'r'),
        (ATTRIB_WRITABLE, 'w'),
        (ATTRIB_EXECUTABLE, 'x'),
        (ATTRIB_DELETABLE, 'd'),
    ]
    .iter()
    .map(|&(mask, c)| if attributes & mask != 0 { c } else { '-' })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Container;
    use chrono::{Datelike, Timelike};

    fn pack(second: u32, minute: u32, hour: u32, day: u32, month: u32, years: u32) -> u32 {
        second | minute << 6 | hour << 12 | day << 17 | month << 22 | years << 26
    }

    #[test]
    fn test_timestamp() {
        let time = decode_timestamp(pack(30, 15, 14, 5, 6, 24)).unwrap();
        assert_eq!((time.year(), time.month(), time.day()), (2004, 6, 5));
        assert_eq!((time.hour(), time.minute(), time.second()), (14, 15, 30));
        assert_eq!(time.to_string(), "2004-06-05 14:15:30");
        assert_eq!(decode_timestamp(pack(0, 0, 0, 31, 2, 0)), None);
        assert_eq!(decode_timestamp(0), None);
    }

    #[test]
    fn test_pointers() {
        let chs = Chs {
            heads: 4,
            sectors_per_track: 32,
        };
        let lba = Pointer::from_bytes(&[0x80, 0x34, 0x12, 0x00]);
        assert_eq!(lba.lba(chs).unwrap(), 0x1234);
        let chs_pointer = Pointer::from_bytes(&[0x00, 2, 1, 5]);
        assert_eq!(chs_pointer.lba(chs).unwrap(), (2 * 4 + 1) * 32 + 4);
        assert!(Pointer::from_bytes(&[0x00, 2, 1, 0]).lba(chs).unwrap_err() == MediaError::InvalidLocation);
        assert!(Pointer::from_bytes(&[0, 0, 0, 0]).is_null());
        assert!(Pointer::from_bytes(&[0xC0, 1, 0, 0]).is_indirect());
    }

    /// Boot sector, partition directory at LBA 1, one native partition
    /// starting at LBA 4 (root directory at LBA 6).
    fn image(entries: &[(&str, u8, [u8; 4], &[u8])]) -> Vec<u8> {
        let mut bytes = vec![0u8; SECTOR_SIZE * 16];
        bytes[..7].copy_from_slice(DFI_SIGNATURE);
        bytes[0x08..0x0C].copy_from_slice(&[0x80, 1, 0, 0]);
        bytes[0x0C] = 1;
        bytes[0x0D] = 16;
        let partitions = &mut bytes[SECTOR_SIZE..SECTOR_SIZE * 2];
        partitions[0] = 0x02;
        partitions[1..4].copy_from_slice(b"CPM");
        partitions[32] = PARTITION_NATIVE;
        partitions[33..38].copy_from_slice(b"WORK ");
        partitions[32 + 0x11..32 + 0x15].copy_from_slice(&[0x80, 4, 0, 0]);
        partitions[32 + 0x15..32 + 0x19].copy_from_slice(&[0x80, 15, 0, 0]);
        let mut data_lba = 8usize;
        for (i, (name, attributes, pointer, data)) in entries.iter().enumerate() {
            let slot = SECTOR_SIZE * 6 + i * 32;
            bytes[slot..slot + 8].copy_from_slice(b"        ");
            bytes[slot..slot + name.len()].copy_from_slice(name.as_bytes());
            bytes[slot + 8..slot + 12].copy_from_slice(&(data.len() as u32).to_le_bytes());
            bytes[slot + 0x10] = *attributes;
            bytes[slot + 0x11..slot + 0x15].copy_from_slice(&pack(30, 15, 14, 5, 6, 24).to_le_bytes());
            if pointer == &[0u8; 4] {
                bytes[slot + 0x0C..slot + 0x10].copy_from_slice(&[0x80, data_lba as u8, 0, 0]);
                let start = data_lba * SECTOR_SIZE;
                bytes[start..start + data.len()].copy_from_slice(data);
                data_lba += (data.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
            } else {
                bytes[slot + 0x0C..slot + 0x10].copy_from_slice(pointer);
            }
        }
        bytes
    }

    #[test]
    fn test_directory() {
        let dfi = Dfi::open(Container::from_bytes(image(&[
            ("README", 0xF9, [0; 4], b"hello"),
            ("TREE", 0xF2, [0xC0, 9, 0, 0], b"abc"),
            ("SUB", 0xA5, [0x80, 10, 0, 0], b""),
        ]))
        .into_handle())
        .unwrap();
        assert_eq!(dfi.label(), "WORK");
        assert_eq!(dfi.partitions().len(), 2);
        assert!(!dfi.case_sensitive());

        let entries = dfi.entries(&mut Progress::default()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "README");
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[0].timestamp.unwrap().to_string(), "2004-06-05 14:15:30");
        assert_eq!(dfi.decode_type(&entries[0]), "SEQ");
        assert_eq!(permissions(entries[0].type_code), "rwxd");
        assert!(!entries[0].partial);
        assert!(entries[1].partial);
        assert!(entries[2].is_dir() && entries[2].partial);
        assert_eq!(dfi.decode_type(&entries[2]), "DIR<");

        let mut data = vec![];
        dfi.open_entry(&entries[0], &Progress::default())
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"hello");
        assert!(dfi.open_entry(&entries[1], &Progress::default()).err().unwrap() == MediaError::Partial);
    }

    #[test]
    fn test_directory_loop() {
        let mut bytes = image(&[("A", 0xF2, [0; 4], b"x")]);
        // Root directory links back to itself.
        bytes[SECTOR_SIZE * 6 + NEXT_DIRECTORY_OFFSET..SECTOR_SIZE * 7].copy_from_slice(&[0x80, 6, 0, 0]);
        let dfi = Dfi::open(Container::from_bytes(bytes).into_handle()).unwrap();
        assert!(dfi.entries(&mut Progress::default()).unwrap_err() == MediaError::ChainLoop);
    }

    #[test]
    fn test_signature() {
        let container = Container::from_bytes(vec![0u8; SECTOR_SIZE]).into_handle();
        assert!(Dfi::open(container).err().unwrap() == MediaError::UnknownFormat);
    }
}
