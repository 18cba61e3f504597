//! Synthetic sources: content generated from inline data in a URL rather
//! than read from an image.
//!
//! * `json:<document>` is a container whose entries are the document's
//!   object keys or array indices.
//! * `sha256:<data>` is a file holding the hex digest of the data.
//! * `qr:<data>` is a file holding the data's QR symbol drawn with Unicode
//!   block elements.

use std::io::{self, Read};

use qrcode::{Color, QrCode};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::MediaError;
use crate::format::{Entry, EntryKind, Format, FormatHandler};
use crate::progress::Progress;
use crate::stream::{Container, ContainerHandle};

/// Light modules drawn around the symbol on every side.
const QUIET_ZONE: usize = 2;

/// These codepoints are block element glyphs that can represent any combination of a 2x2 pixel
/// bitmap.  The most significant two bits are the upper pixels, and the least significant bits are
/// the lower pixels.
#[rustfmt::skip]
static UNICODE_BLOCK_ELEMENTS: [char; 16] = [
    ' ', '\u{2597}', '\u{2596}', '\u{2584}',
    '\u{259D}', '\u{2590}', '\u{259E}', '\u{259F}',
    '\u{2598}', '\u{259A}', '\u{258C}', '\u{2599}',
    '\u{2580}', '\u{259C}', '\u{259B}', '\u{2588}',
];

/// Split `url` into a synthetic scheme and its inline data.
pub fn parse_url(url: &str) -> Option<(Format, &str)> {
    let (scheme, data) = url.split_once(':')?;
    [Format::Json, Format::Sha256, Format::Qr]
        .iter()
        .find(|f| f.scheme().map_or(false, |s| s.eq_ignore_ascii_case(scheme)))
        .map(|&f| (f, data))
}

/// Generate the container for a synthetic source.
pub fn generate(format: Format, data: &str) -> io::Result<Container> {
    match format {
        Format::Json => Ok(Container::from_bytes(data.as_bytes())),
        Format::Sha256 => Ok(Container::from_bytes(sha256_hex(data.as_bytes()))),
        Format::Qr => Ok(Container::from_bytes(render_qr(data.as_bytes())?)),
        _ => Err(MediaError::UnknownFormat.into()),
    }
}

/// Lowercase hex digest followed by a newline.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut text = hex::encode(Sha256::digest(data));
    text.push('\n');
    text
}

/// Draw the QR symbol for `data`, two module rows per text row.
pub fn render_qr(data: &[u8]) -> io::Result<String> {
    let code = QrCode::new(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let width = code.width();
    let colors = code.to_colors();
    let size = width + 2 * QUIET_ZONE;
    let dark = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE || x >= width + QUIET_ZONE || y >= width + QUIET_ZONE {
            return false;
        }
        colors[(y - QUIET_ZONE) * width + (x - QUIET_ZONE)] == Color::Dark
    };

    let rows = (size + 1) / 2;
    let columns = (size + 1) / 2;
    let mut text = String::with_capacity(rows * (columns * 3 + 1));
    for row in 0..rows {
        for column in 0..columns {
            let (x, y) = (column * 2, row * 2);
            let glyph = (dark(x, y) as usize) << 3
                | (dark(x + 1, y) as usize) << 2
                | (dark(x, y + 1) as usize) << 1
                | dark(x + 1, y + 1) as usize;
            text.push(UNICODE_BLOCK_ELEMENTS[glyph]);
        }
        text.push('\n');
    }
    Ok(text)
}

/// An inline JSON document presented as a directory.
pub struct Json {
    container: ContainerHandle,
    members: Vec<(String, Value)>,
}

impl Json {
    pub fn open(container: ContainerHandle) -> io::Result<Json> {
        let document: Value = serde_json::from_slice(container.bytes())
            .map_err(|_| MediaError::InvalidHeader.to_io_error())?;
        let members = match document {
            Value::Object(map) => map.into_iter().collect(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => return Err(MediaError::NotADirectory.into()),
        };
        Ok(Json { container, members })
    }

    /// Strings read as their text; everything else as compact JSON.
    fn content(value: &Value) -> io::Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => serde_json::to_vec(other).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

impl FormatHandler for Json {
    fn format(&self) -> Format {
        Format::Json
    }

    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn block_size(&self) -> usize {
        1
    }

    fn label(&self) -> &str {
        ""
    }

    fn entries(&self, progress: &mut Progress) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::with_capacity(self.members.len());
        for (i, (name, value)) in self.members.iter().enumerate() {
            progress.tick()?;
            let mut entry = Entry::new(i + 1, name.clone(), Self::content(value)?.len() as u64);
            // Members have no container offset; the offset indexes them.
            entry.offset = i as u64;
            if value.is_object() || value.is_array() {
                entry.kind = EntryKind::Directory;
                entry.format_hint = Some("json".to_string());
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn open_entry(&self, entry: &Entry, _progress: &Progress) -> io::Result<Box<dyn Read + Send>> {
        let (_, value) = self
            .members
            .get(entry.offset as usize)
            .ok_or_else(|| MediaError::NotFound.to_io_error())?;
        Ok(Box::new(io::Cursor::new(Self::content(value)?)))
    }

    fn decode_type(&self, entry: &Entry) -> String {
        match self.members.get(entry.offset as usize).map(|(_, v)| v) {
            Some(Value::Object(_)) => "OBJ",
            Some(Value::Array(_)) => "ARR",
            Some(Value::String(_)) => "STR",
            Some(Value::Number(_)) => "NUM",
            Some(Value::Bool(_)) => "BOOL",
            Some(Value::Null) => "NULL",
            None => "???",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut reader: Box<dyn Read + Send>) -> String {
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_parse_url() {
        assert_eq!(parse_url("json:{}"), Some((Format::Json, "{}")));
        assert_eq!(parse_url("SHA256:abc"), Some((Format::Sha256, "abc")));
        assert_eq!(parse_url("qr:a:b"), Some((Format::Qr, "a:b")));
        assert_eq!(parse_url("http://host"), None);
        assert_eq!(parse_url("disk.d64"), None);
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\n"
        );
    }

    #[test]
    fn test_qr_rendering() {
        let text = render_qr(b"HELLO").unwrap();
        // Version 1 symbols are 21 modules wide, plus the quiet zone.
        let size = 21 + 2 * QUIET_ZONE;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), (size + 1) / 2);
        assert!(lines.iter().all(|l| l.chars().count() == (size + 1) / 2));
        // The first row is all quiet zone.
        assert!(lines[0].chars().all(|c| c == ' '));
        // Top-left corner of the finder pattern: dark above, dark and light
        // below.
        assert_eq!(lines[1].chars().nth(1), Some('\u{259B}'));
    }

    #[test]
    fn test_json_members() {
        let json = Json::open(
            Container::from_bytes(&br#"{"name":"disk","tracks":35,"files":["a","b"]}"#[..]).into_handle(),
        )
        .unwrap();
        let entries = json.entries(&mut Progress::default()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["name", "tracks", "files"]);
        assert_eq!(entries[0].size, 4);
        assert!(entries[2].is_dir());
        assert_eq!(json.decode_type(&entries[1]), "NUM");
        assert_eq!(read_all(json.open_entry(&entries[0], &Progress::default()).unwrap()), "disk");
        assert_eq!(read_all(json.open_entry(&entries[1], &Progress::default()).unwrap()), "35");
        assert_eq!(read_all(json.open_entry(&entries[2], &Progress::default()).unwrap()), r#"["a","b"]"#);
    }

    #[test]
    fn test_json_scalar_is_not_a_directory() {
        let container = Container::from_bytes(&b"42"[..]).into_handle();
        assert!(Json::open(container).err().unwrap() == MediaError::NotADirectory);
        let container = Container::from_bytes(&b"{not json"[..]).into_handle();
        assert!(Json::open(container).err().unwrap() == MediaError::InvalidHeader);
    }
}
