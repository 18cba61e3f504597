use std::fmt;

pub mod wildcard;

const COLUMNS: usize = 16;

/// Write a hexdump of the provided byte slice.  Offsets are printed relative
/// to `base`, so a large stream can be dumped one buffer at a time.
pub fn hexdump(f: &mut fmt::Formatter, base: u64, buffer: &[u8]) -> fmt::Result {
    if buffer.is_empty() {
        // For a zero-length buffer, at least print an offset instead of
        // nothing.
        return write!(f, "{:06x}: ", base);
    }
    for (row_index, row) in buffer.chunks(COLUMNS).enumerate() {
        if row_index > 0 {
            writeln!(f)?;
        }
        write!(f, "{:06x}: ", base + (row_index * COLUMNS) as u64)?;
        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in row.len()..COLUMNS {
            f.write_str("   ")?;
        }
        for b in row {
            let c = match *b {
                c @ 0x20..=0x7E => c as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

pub struct Hex<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, self.base, self.bytes)
    }
}

pub fn hex(bytes: &[u8]) -> Hex {
    Hex { base: 0, bytes }
}

pub fn hex_at(base: u64, bytes: &[u8]) -> Hex {
    Hex { base, bytes }
}

/// Read a little-endian u16 at `offset`.  Callers are expected to have
/// bounds-checked the slice.
#[inline]
pub fn le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Read a little-endian 24-bit value at `offset`.
#[inline]
pub fn le24(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], 0])
}

/// Read a little-endian u32 at `offset`.
#[inline]
pub fn le32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_rows() {
        let bytes: Vec<u8> = (0x40..0x52).collect();
        let text = hex_at(0x100, &bytes).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("000100: 40 41"));
        assert!(lines[0].ends_with("@ABCDEFGHIJKLMNO"));
        assert!(lines[1].starts_with("000110: 50 51 "));
        assert!(lines[1].ends_with("PQ"));
    }

    #[test]
    fn test_empty_hex() {
        assert_eq!(hex(&[]).to_string(), "000000: ");
    }

    #[test]
    fn test_little_endian_helpers() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(le16(&bytes, 0), 0x0201);
        assert_eq!(le24(&bytes, 1), 0x040302);
        assert_eq!(le32(&bytes, 0), 0x04030201);
    }
}
