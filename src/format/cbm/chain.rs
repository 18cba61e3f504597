use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use crate::error::MediaError;
use crate::format::cbm::block::{Location, SectorSource, BLOCK_SIZE};
use crate::progress::Progress;

/// The first two bytes of every chained block.
#[derive(Debug, PartialEq, Eq)]
pub enum ChainLink {
    Next(Location),
    Tail(usize), // used bytes
}

impl ChainLink {
    #[inline]
    pub fn new(block: &[u8]) -> io::Result<ChainLink> {
        if block[0] == 0x00 {
            // This is the last sector of the chain, so the next byte indicates how much of
            // this sector is actually used.
            if block[1] < 1 {
                // It's not valid for a chain sector to not include the first two bytes
                // as allocated.
                return Err(MediaError::InvalidChainLink.into());
            }
            Ok(ChainLink::Tail(block[1] as usize + 1)) // 2..=256
        } else {
            Ok(ChainLink::Next(Location::from_bytes(block)))
        }
    }
}

/// A ChainSector is the result of a chain iteration, and provides the block contents and the
/// location from which it was read.
pub struct ChainSector {
    /// The used portion of the block, including the two-byte link.
    pub data: Vec<u8>,
    pub location: Location,
}

/// Iterate the blocks of a chain.  Iteration stops with an error if a block
/// is revisited, or once the chain grows past `Limits::max_chain_blocks`.
pub struct ChainIterator {
    sectors: Arc<dyn SectorSource>,
    next_sector: Option<Location>,
    visited_sectors: HashSet<Location>,
    progress: Progress,
    scan: Progress,
}

impl ChainIterator {
    pub fn new(sectors: Arc<dyn SectorSource>, start: Location, progress: &Progress) -> ChainIterator {
        ChainIterator {
            sectors,
            next_sector: Some(start),
            visited_sectors: HashSet::new(),
            progress: progress.bounded(progress.limits().max_chain_blocks),
            scan: progress.unbounded(),
        }
    }

    /// Read the entire chain and return a list of locations.
    pub fn locations(self) -> io::Result<Vec<Location>> {
        self.map(|r| r.map(|cs| cs.location)).collect()
    }

    fn read_next(&mut self, location: Location) -> io::Result<ChainSector> {
        self.progress.tick()?;
        // Loop detection.
        if !self.visited_sectors.insert(location) {
            return Err(MediaError::ChainLoop.into());
        }
        let block = self.sectors.sector(location, &mut self.scan)?;
        let size = match ChainLink::new(&block)? {
            ChainLink::Next(next) => {
                self.next_sector = Some(next);
                BLOCK_SIZE
            }
            ChainLink::Tail(size) => size,
        };
        Ok(ChainSector {
            data: block[..size].to_vec(),
            location,
        })
    }
}

impl Iterator for ChainIterator {
    type Item = io::Result<ChainSector>;

    fn next(&mut self) -> Option<io::Result<ChainSector>> {
        let location = self.next_sector.take()?;
        let result = self.read_next(location);
        if result.is_err() {
            self.next_sector = None;
        }
        Some(result)
    }
}

/// Walk the chain starting at `start` and return the number of data bytes it
/// holds: 254 for every full block plus the used part of the tail block.
pub fn seek_file_size(
    sectors: Arc<dyn SectorSource>,
    start: Location,
    progress: &Progress,
) -> io::Result<u64> {
    let mut size = 0u64;
    for block in ChainIterator::new(sectors, start, progress) {
        size += (block?.data.len() - 2) as u64;
    }
    Ok(size)
}

/// ChainReader objects implement the Read trait and are used to read a byte
/// stream represented as a series of chained sectors on the disk image.
pub struct ChainReader {
    chain: ChainIterator,
    block: Vec<u8>,
    block_position: usize,
    pending: Option<io::Error>,
    eof: bool,
}

impl ChainReader {
    pub fn new(sectors: Arc<dyn SectorSource>, start: Location, progress: &Progress) -> ChainReader {
        ChainReader {
            chain: ChainIterator::new(sectors, start, progress),
            block: Vec::new(),
            block_position: 0,
            pending: None,
            eof: false,
        }
    }
}

impl io::Read for ChainReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        let mut total = 0;
        while total < buf.len() && !self.eof {
            if self.block_position < self.block.len() {
                // Copy as much of this block as possible into the caller-provided buffer.
                let nbytes = (self.block.len() - self.block_position).min(buf.len() - total);
                buf[total..total + nbytes]
                    .copy_from_slice(&self.block[self.block_position..self.block_position + nbytes]);
                self.block_position += nbytes;
                total += nbytes;
                continue;
            }
            match self.chain.next() {
                Some(Ok(mut sector)) => {
                    // discard the next-track/sector bytes
                    self.block = sector.data.split_off(2);
                    self.block_position = 0;
                }
                Some(Err(e)) => {
                    self.eof = true;
                    if total > 0 {
                        // Hand back what was read, then report the error.
                        self.pending = Some(e);
                        return Ok(total);
                    }
                    return Err(e);
                }
                None => self.eof = true,
            }
        }
        Ok(total)
    }
}
