//! In-memory builders for every container format the integration tests
//! exercise.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cbm_media::gcr;

pub const PADDING: u8 = 0xA0;
pub const D64_SIZE: usize = 174848;

pub type Sector = [u8; 256];

/// Deterministic file content.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Lay out a CBM DOS disk: the header at 18/0, one directory sector at
/// 18/1, and each file as a block chain allocated from 1/0 upward.
pub fn cbm_disk(disk_name: &str, files: &[(&str, u8, &[u8])]) -> BTreeMap<(u8, u8), Sector> {
    assert!(files.len() <= 8);
    let mut sectors = BTreeMap::new();
    let mut next = (1u8, 0u8);
    let mut allocate = || {
        let location = next;
        next.1 += 1;
        if next.1 >= gcr::sectors_per_track(next.0) {
            next = (next.0 + 1, 0);
            if next.0 == 18 {
                next.0 = 19;
            }
        }
        location
    };

    let mut header = [0u8; 256];
    header[0] = 18;
    header[1] = 1;
    header[0x90..0xA0].copy_from_slice(&[PADDING; 16]);
    header[0x90..0x90 + disk_name.len()].copy_from_slice(disk_name.as_bytes());
    header[0xA2..0xA4].copy_from_slice(b"AB");
    header[0xA5..0xA7].copy_from_slice(b"2A");
    sectors.insert((18, 0), header);

    let mut directory = [0u8; 256];
    directory[0] = 0;
    directory[1] = 0xFF;
    for (i, (name, type_code, content)) in files.iter().enumerate() {
        let chunks: Vec<&[u8]> = if content.is_empty() {
            vec![&[][..]]
        } else {
            content.chunks(254).collect()
        };
        let locations: Vec<(u8, u8)> = chunks.iter().map(|_| allocate()).collect();
        for (j, chunk) in chunks.iter().enumerate() {
            let mut block = [0u8; 256];
            match locations.get(j + 1) {
                Some(&(t, s)) => {
                    block[0] = t;
                    block[1] = s;
                }
                None => {
                    block[0] = 0;
                    block[1] = chunk.len() as u8 + 1;
                }
            }
            block[2..2 + chunk.len()].copy_from_slice(chunk);
            sectors.insert(locations[j], block);
        }

        let raw = &mut directory[i * 32..i * 32 + 32];
        raw[2] = *type_code;
        raw[3] = locations[0].0;
        raw[4] = locations[0].1;
        raw[5..21].copy_from_slice(&[PADDING; 16]);
        raw[5..5 + name.len()].copy_from_slice(name.as_bytes());
        raw[0x1E..0x20].copy_from_slice(&(chunks.len() as u16).to_le_bytes());
    }
    sectors.insert((18, 1), directory);
    sectors
}

fn d64_offset(track: u8, sector: u8) -> usize {
    let preceding: usize = (1..track).map(|t| gcr::sectors_per_track(t) as usize).sum();
    (preceding + sector as usize) * 256
}

pub fn d64(sectors: &BTreeMap<(u8, u8), Sector>) -> Vec<u8> {
    let mut image = vec![0u8; D64_SIZE];
    for (&(track, sector), data) in sectors {
        let offset = d64_offset(track, sector);
        image[offset..offset + 256].copy_from_slice(data);
    }
    image
}

/// Encode the populated sectors of `track` as a GCR bitstream.
pub fn gcr_track(track: u8, sectors: &BTreeMap<(u8, u8), Sector>) -> Vec<u8> {
    let mut bytes = vec![];
    for (&(_, sector), data) in sectors.range((track, 0)..=(track, 255)) {
        bytes.extend_from_slice(&[0xFF; 5]);
        bytes.extend(gcr::encode(&gcr::header_block(track, sector, b'A', b'B')).unwrap());
        bytes.extend_from_slice(&[0x55; 9]);
        bytes.extend_from_slice(&[0xFF; 5]);
        bytes.extend(gcr::encode(&gcr::data_block(data)).unwrap());
        bytes.extend_from_slice(&[0x55; 8]);
    }
    bytes
}

pub const G64_HALF_TRACKS: usize = 84;

pub fn g64(sectors: &BTreeMap<(u8, u8), Sector>) -> Vec<u8> {
    let mut image = b"GCR-1541".to_vec();
    image.push(0);
    image.push(G64_HALF_TRACKS as u8);
    image.extend_from_slice(&7928u16.to_le_bytes());
    let table = image.len();
    image.resize(table + G64_HALF_TRACKS * 8, 0);

    let mut tracks: Vec<u8> = sectors.keys().map(|&(t, _)| t).collect();
    tracks.dedup();
    for track in tracks {
        let data = gcr_track(track, sectors);
        let offset = image.len() as u32;
        let entry = table + (track as usize - 1) * 2 * 4;
        image[entry..entry + 4].copy_from_slice(&offset.to_le_bytes());
        image.extend_from_slice(&(data.len() as u16).to_le_bytes());
        image.extend_from_slice(&data);
    }
    image
}

fn block_align(size: usize) -> usize {
    (size + 253) / 254 * 254
}

/// A Lynx archive with a short BASIC preamble and two directory blocks.
pub fn lnx(files: &[(&str, char, &[u8])]) -> Vec<u8> {
    let mut bytes = vec![0x01, 0x08, 0x5B, 0x08, 0x0A, 0x00, 0x97];
    bytes.extend_from_slice(b"\r 1  *LYNX XV  BY WILL CORLEY\r 2 \r");
    bytes.extend_from_slice(format!(" {} \r", files.len()).as_bytes());
    bytes.extend_from_slice(b"TESTS\r");
    bytes.resize(254, 0);
    for (name, kind, content) in files {
        let mut padded = name.as_bytes().to_vec();
        padded.resize(16, PADDING);
        bytes.extend_from_slice(&padded);
        let blocks = (content.len() + 253) / 254;
        let last = content.len() - (blocks.max(1) - 1) * 254;
        bytes.extend_from_slice(format!("\r {} \r{}\r {} \r", blocks, kind, last).as_bytes());
    }
    assert!(bytes.len() <= 2 * 254);
    bytes.resize(2 * 254, 0);
    for (_, _, content) in files {
        let start = bytes.len();
        bytes.extend_from_slice(content);
        bytes.resize(start + block_align(content.len()), 0);
    }
    bytes
}

/// A T64 tape holding each file at its load address.
pub fn t64(files: &[(&str, u16, &[u8])]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x40];
    bytes[..20].copy_from_slice(b"C64S tape image file");
    bytes[0x20..0x22].copy_from_slice(&0x0101u16.to_le_bytes());
    bytes[0x22] = files.len() as u8;
    bytes[0x24] = files.len() as u8;
    bytes[0x28..0x40].copy_from_slice(b"INTEGRATION             ");
    let mut data_offset = 0x40 + files.len() * 32;
    let mut data = vec![];
    for (name, load, content) in files {
        let mut record = [0u8; 32];
        record[0] = 1;
        record[1] = 0x82;
        record[2..4].copy_from_slice(&load.to_le_bytes());
        record[4..6].copy_from_slice(&(load + content.len() as u16).to_le_bytes());
        record[8..12].copy_from_slice(&(data_offset as u32).to_le_bytes());
        record[16..32].copy_from_slice(&[b' '; 16]);
        record[16..16 + name.len()].copy_from_slice(name.as_bytes());
        bytes.extend_from_slice(&record);
        data.extend_from_slice(content);
        data_offset += content.len();
    }
    bytes.extend_from_slice(&data);
    bytes
}

pub const TCRT_PRG: u8 = 1;
pub const TCRT_DATA: u8 = 2;
pub const TCRT_BUNDLE: u8 = 3;

/// A Tapecart image whose flash holds the directory at 0x1000 and file
/// data from page 0x20 on.
pub fn tcrt(files: &[(&str, u8, u16, &[u8], &[u8; 4])]) -> Vec<u8> {
    let mut flash = vec![0xFFu8; 0x2000];
    for (slot, (name, kind, load, content, bundle)) in files.iter().enumerate() {
        let page = (flash.len() / 256) as u16;
        let record = &mut flash[0x1000 + slot * 32..0x1000 + slot * 32 + 32];
        record.iter_mut().for_each(|b| *b = 0);
        record[..name.len()].copy_from_slice(name.as_bytes());
        record[0x10] = *kind;
        record[0x11..0x13].copy_from_slice(&page.to_le_bytes());
        record[0x13..0x16].copy_from_slice(&(content.len() as u32).to_le_bytes()[..3]);
        record[0x16..0x18].copy_from_slice(&load.to_le_bytes());
        record[0x18..0x1C].copy_from_slice(&bundle[..]);
        flash.extend_from_slice(content);
        let aligned = (flash.len() + 255) / 256 * 256;
        flash.resize(aligned, 0xFF);
    }
    let mut bytes = vec![0u8; 0xD8];
    bytes[..16].copy_from_slice(b"tapecartImage\r\n\x1a");
    bytes[0x10] = 1;
    bytes[0x18..0x1E].copy_from_slice(b"BUNDLE");
    bytes[0xD4..0xD8].copy_from_slice(&(flash.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&flash);
    bytes
}

pub fn dfi_timestamp(second: u32, minute: u32, hour: u32, day: u32, month: u32, years: u32) -> u32 {
    second | minute << 6 | hour << 12 | day << 17 | month << 22 | years << 26
}

/// A DFI image with one native partition (sectors 4-15, root directory at
/// sector 6).  Entries with a null pointer get their data stored from
/// sector 8 on; any other pointer is stored as given.
pub fn dfi(entries: &[(&str, u8, [u8; 4], &[u8])]) -> Vec<u8> {
    const SECTOR: usize = 512;
    let mut bytes = vec![0u8; SECTOR * 16];
    bytes[..7].copy_from_slice(b"DFIMAGE");
    bytes[0x08..0x0C].copy_from_slice(&[0x80, 1, 0, 0]);
    bytes[0x0C] = 1;
    bytes[0x0D] = 16;
    let partitions = &mut bytes[SECTOR..SECTOR * 2];
    partitions[0] = 0x01;
    partitions[1..6].copy_from_slice(b"SYSTM");
    partitions[0x11..0x15].copy_from_slice(&[0x80, 4, 0, 0]);
    partitions[0x15..0x19].copy_from_slice(&[0x80, 15, 0, 0]);
    let mut data_sector = 8usize;
    for (i, (name, attributes, pointer, content)) in entries.iter().enumerate() {
        let slot = SECTOR * 6 + i * 32;
        bytes[slot..slot + 8].copy_from_slice(b"        ");
        bytes[slot..slot + name.len()].copy_from_slice(name.as_bytes());
        bytes[slot + 8..slot + 12].copy_from_slice(&(content.len() as u32).to_le_bytes());
        bytes[slot + 0x10] = *attributes;
        bytes[slot + 0x11..slot + 0x15].copy_from_slice(&dfi_timestamp(0, 30, 9, 17, 3, 9).to_le_bytes());
        if pointer == &[0u8; 4] {
            bytes[slot + 0x0C..slot + 0x10].copy_from_slice(&[0x80, data_sector as u8, 0, 0]);
            let start = data_sector * SECTOR;
            bytes[start..start + content.len()].copy_from_slice(content);
            data_sector += (content.len() + SECTOR - 1) / SECTOR;
        } else {
            bytes[slot + 0x0C..slot + 0x10].copy_from_slice(pointer);
        }
    }
    bytes
}
