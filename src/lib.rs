//! A read-only virtual filesystem over formats found in Commodore Business
//! Machines (CBM) products from the 1980's.  Disk images, tape and disk
//! archives, cartridge images and hard-disk images are all presented as
//! uniform files, directories and byte streams, and containers may be
//! nested inside one another to any depth.
//!
//! Features:
//!
//! * Decode raw GCR track data (G64) into 1541 sectors, tolerating damaged
//! media by returning partially decoded sectors.
//! * Read the CBM DOS directories of G64, D64, D71, and D81 disk images,
//! walking file block chains with loop and length protection.
//! * Read Lynx (LNX) disk archives, T64 tape images, and Tapecart (TCRT)
//! cartridge images, including sub-images bundled inside a cartridge.
//! * Read the directories of CMD hard-disk images (DFI), including packed
//! timestamps.  Files stored in data trees and subdirectories are reported
//! as partial rather than silently truncated.
//! * Synthetic sources: `json:`, `sha256:` and `qr:` URLs generate their
//! content from the URL itself.
//! * Share parsed images between every file and stream that opens the same
//! URL.
//! * A sample `mstream` program for listing, reading, and dumping any path.
//!
//! # Example
//!
//! The following example lists a container and reads one of its entries:
//!
//! ```
//! use std::io::{self, Read};
//! use cbm_media::vfs::Registry;
//! # fn main() -> io::Result<()> {
//! let registry = Registry::new();
//! let mut dir = registry.open(r#"json:{"HELLO":"hello, world","DATA":[1,2,3]}"#)?;
//! while let Some(file) = dir.get_next_file_in_dir()? {
//!     println!("{:<5} {:>4} {}", file.type_name(), file.size(), file.name());
//! }
//!
//! let mut text = String::new();
//! dir.child("HEL*")?.open()?.read_to_string(&mut text)?;
//! assert_eq!(text, "hello, world");
//! # Ok(())
//! # }
//! ```
//!
//! A path may run from the host filesystem into a container and on into
//! containers nested inside it, e.g. `games/collection.lnx/DISK2.D64/LOADER`.
//!
//! # Design
//!
//! The crate is built in layers:
//!
//! 1. `Container` holds the raw bytes of one image, either memory-mapped
//!    from a host file or owned in memory.  Containers are shared through
//!    `ContainerHandle` (an `Arc`), and close when the last user drops them.
//! 2. A `FormatHandler` parses one container format: it validates the
//!    header, builds the entry table, and hands out a reader for any one
//!    entry.  Handlers hold no cursor state.
//! 3. `MediaImage` pairs a handler with its lazily loaded entry table, and
//!    `MediaStream` is one checkout of an image with its own position and
//!    selected entry.  The `ImageBroker` makes sure at most one image exists
//!    per URL while anything references it.
//! 4. The `vfs::Registry` maps names to filesystems by extension or URL
//!    scheme, and resolves paths into `MFile`s.
//!
//! Every traversal over container data (block chains, directory chains,
//! entry tables, GCR track scans) counts its iterations through a
//! `Progress`, which bounds the traversal, yields periodically, and honors
//! cancellation.  A damaged or hostile image fails with an error rather
//! than hanging.
//!
//! CBM DOS tracks start at 1 instead of 0.  The API reflects this 1-based
//! indexing, and entry indexes are 1-based as well.
//!
//! # License
//!
//! Cbm-media is distributed under the terms of both the MIT license and the
//! Apache License (Version 2.0).
//!
//! See LICENSE-APACHE and LICENSE-MIT for details.

pub mod config;
pub mod error;
pub mod format;
pub mod gcr;
pub mod petscii;
pub mod progress;
pub mod stream;
pub mod util;
pub mod vfs;

pub use crate::config::{Config, Limits};
pub use crate::error::MediaError;
pub use crate::format::{Entry, EntryKind, Format, FormatHandler};
pub use crate::progress::Progress;
pub use crate::stream::{Container, ContainerHandle, ImageBroker, MediaImage, MediaStream, Scanner, Seekable};
pub use crate::vfs::{MFile, MFileSystem, Registry};
