//! Minimal PETSCII-to-text conversion for filenames and labels.
//!
//! Full character-set transcoding belongs to the host side; the media layer
//! only needs a stable, printable rendition of names so they can be compared
//! against requested paths.

/// CBM DOS pads filenames, disk names, etc. with shifted spaces.
pub const PADDING_BYTE: u8 = 0xA0;

/// Render a single PETSCII byte as a char.
pub fn to_char(byte: u8) -> char {
    match byte {
        0x5C => '£',
        0x5E => '↑',
        0x5F => '←',
        0x20..=0x7E => byte as char,
        // Shifted letters are shown as their unshifted forms.
        0xC1..=0xDA => (byte - 0x80) as char,
        PADDING_BYTE => ' ',
        _ => '?',
    }
}

/// Convert PETSCII bytes to a string.
pub fn to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| to_char(b)).collect()
}

/// Strip trailing `padding` bytes, then convert.
pub fn from_padded_bytes(bytes: &[u8], padding: u8) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != padding)
        .map(|p| p + 1)
        .unwrap_or(0);
    to_string(&bytes[..end])
}

/// Return the raw bytes with trailing `padding` removed.
pub fn trim_padding(bytes: &[u8], padding: u8) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != padding)
        .map(|p| p + 1)
        .unwrap_or(0);
    &bytes[..end]
}
