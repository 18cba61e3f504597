use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::MediaError;
use crate::format::{extension_of, Entry, Format};
use crate::stream::{Container, ContainerCursor, ContainerHandle, MediaImage, MediaStream};
use crate::vfs::{MFileSystem, Registry};

/// Extensions of files that hold plain text.
static TEXT_EXTENSIONS: &[&str] = &["txt", "seq", "json", "md", "cfg", "ini", "toml"];

#[derive(Clone)]
enum Node {
    /// A file or directory on the host.
    Host(PathBuf),
    /// Content generated from a URL.
    Source(Arc<dyn MFileSystem>, ContainerHandle),
    /// One entry of a parsed container.
    Entry(Arc<MediaImage>, Entry),
}

enum Listing {
    Host(std::vec::IntoIter<PathBuf>),
    Image(MediaStream),
}

/// A file resolved through a `Registry`: a host file or directory, a
/// synthetic source, or an entry inside a container at any depth.  Files
/// that a container filesystem claims are directories too, and can be
/// listed or descended into.
pub struct MFile {
    registry: Registry,
    url: String,
    name: String,
    node: Node,
    listing: Option<Listing>,
}

impl MFile {
    pub(crate) fn host(registry: Registry, path: PathBuf) -> MFile {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        MFile {
            registry,
            url: path.to_string_lossy().into_owned(),
            name,
            node: Node::Host(path),
            listing: None,
        }
    }

    pub(crate) fn source(
        registry: Registry,
        url: &str,
        filesystem: Arc<dyn MFileSystem>,
        container: ContainerHandle,
    ) -> MFile {
        MFile {
            registry,
            url: url.to_string(),
            name: url.to_string(),
            node: Node::Source(filesystem, container),
            listing: None,
        }
    }

    fn entry(&self, image: Arc<MediaImage>, entry: Entry) -> MFile {
        MFile {
            registry: self.registry.clone(),
            url: format!("{}/{}", self.url, entry.name),
            name: entry.name.clone(),
            node: Node::Entry(image, entry),
            listing: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase extension of the name, or the scheme of a synthetic
    /// source.
    pub fn extension(&self) -> Option<String> {
        match self.node {
            Node::Source(..) => self.url.split_once(':').map(|(scheme, _)| scheme.to_ascii_lowercase()),
            _ => extension_of(&self.name),
        }
    }

    /// The container entry this file refers to, if any.
    pub fn container_entry(&self) -> Option<&Entry> {
        match self.node {
            Node::Entry(_, ref entry) => Some(entry),
            _ => None,
        }
    }

    pub fn size(&self) -> u64 {
        match self.node {
            Node::Host(ref path) => match fs::metadata(path) {
                Ok(ref metadata) if metadata.is_file() => metadata.len(),
                _ => 0,
            },
            Node::Source(_, ref container) => container.len(),
            Node::Entry(_, ref entry) => entry.size,
        }
    }

    /// The container filesystem for this file, if one claims it.
    fn filesystem(&self) -> Option<Arc<dyn MFileSystem>> {
        let filesystem = match self.node {
            Node::Host(ref path) if path.is_dir() => None,
            Node::Host(_) => self.registry.find(&self.name),
            Node::Source(ref filesystem, _) => Some(filesystem.clone()),
            Node::Entry(_, ref entry) => match entry.format_hint {
                Some(ref hint) => self.registry.find_hint(hint),
                None => self.registry.find(&self.name),
            },
        };
        filesystem.filter(|fs| fs.is_container())
    }

    /// Whether this file can be listed: a host directory, a directory
    /// entry, or anything a container filesystem claims.
    pub fn is_dir(&self) -> bool {
        match self.node {
            Node::Host(ref path) if path.is_dir() => true,
            Node::Entry(_, ref entry) if entry.is_dir() => true,
            _ => self.filesystem().is_some(),
        }
    }

    pub fn is_text(&self) -> bool {
        match self.node {
            Node::Source(ref filesystem, _) => !filesystem.is_container(),
            Node::Entry(ref image, ref entry) if !entry.is_dir() => {
                let kind = image.handler().decode_type(entry);
                kind.starts_with("SEQ") || kind == "STR" || self.has_text_extension()
            }
            _ => !self.is_dir() && self.has_text_extension(),
        }
    }

    fn has_text_extension(&self) -> bool {
        self.extension()
            .map_or(false, |ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Type of the file as a directory listing shows it.
    pub fn type_name(&self) -> String {
        match self.node {
            Node::Host(ref path) if path.is_dir() => "DIR".to_string(),
            Node::Entry(ref image, ref entry) => image.handler().decode_type(entry),
            _ => self
                .extension()
                .map_or_else(|| "FILE".to_string(), |ext| ext.to_ascii_uppercase()),
        }
    }

    /// Open the file's bytes.  For a container this is the container image
    /// itself, byte for byte.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self.node {
            Node::Host(ref path) if path.is_dir() => Err(MediaError::NotFound.into()),
            Node::Host(ref path) => Ok(Box::new(ContainerCursor::new(open_host(path)?))),
            Node::Source(_, ref container) => Ok(Box::new(ContainerCursor::new(container.clone()))),
            Node::Entry(ref image, ref entry) => {
                if entry.is_dir() && entry.partial {
                    return Err(MediaError::Partial.into());
                }
                image.handler().open_entry(entry, image.progress())
            }
        }
    }

    /// The file's bytes as a container.  Entries are read into memory.
    pub fn container(&self) -> io::Result<ContainerHandle> {
        match self.node {
            Node::Source(_, ref container) => Ok(container.clone()),
            Node::Host(ref path) => open_host(path),
            Node::Entry(..) => Ok(Container::from_reader(self.open()?)?.into_handle()),
        }
    }

    /// The parsed image of this container file, shared through the
    /// registry's broker.
    pub fn image(&self) -> io::Result<Arc<MediaImage>> {
        let filesystem = match self.filesystem() {
            Some(filesystem) => filesystem,
            None => {
                return Err(match self.container_entry() {
                    Some(entry) if entry.is_dir() && entry.partial => MediaError::Partial,
                    Some(entry) if entry.is_dir() => MediaError::NotFound,
                    _ => MediaError::NotADirectory,
                }
                .into())
            }
        };
        self.registry.obtain_image(&self.url, &filesystem, || self.container())
    }

    /// A new media stream over this container file, with its own cursor.
    pub fn get_decoded_stream(&self) -> io::Result<MediaStream> {
        Ok(self.image()?.stream())
    }

    /// The format this container file decodes as.
    pub fn format(&self) -> io::Result<Format> {
        Ok(self.image()?.format())
    }

    /// Resolve `name` within this directory.  Inside a container, `name`
    /// may use `*` and `?` wildcards.
    pub fn child(&self, name: &str) -> io::Result<MFile> {
        if let Node::Host(ref path) = self.node {
            if path.is_dir() {
                let path = path.join(name);
                if !path.exists() {
                    return Err(MediaError::NotFound.into());
                }
                return Ok(MFile::host(self.registry.clone(), path));
            }
        }
        let image = self.image()?;
        let entry = image.stream().seek_entry(name)?.clone();
        debug!(url = %self.url, entry = %entry.name, "resolved child");
        Ok(self.entry(image, entry))
    }

    fn open_listing(&self) -> io::Result<Listing> {
        if let Node::Host(ref path) = self.node {
            if path.is_dir() {
                let mut paths = fs::read_dir(path)?
                    .map(|dirent| dirent.map(|d| d.path()))
                    .collect::<io::Result<Vec<PathBuf>>>()?;
                paths.sort();
                return Ok(Listing::Host(paths.into_iter()));
            }
        }
        Ok(Listing::Image(self.get_decoded_stream()?))
    }

    /// Return the next file of this directory, or None once the listing is
    /// exhausted.  The first call, and the first call after exhaustion,
    /// starts the listing from the beginning.
    pub fn get_next_file_in_dir(&mut self) -> io::Result<Option<MFile>> {
        let mut listing = match self.listing.take() {
            Some(listing) => listing,
            None => self.open_listing()?,
        };
        let next = match listing {
            Listing::Host(ref mut paths) => paths.next().map(|p| MFile::host(self.registry.clone(), p)),
            Listing::Image(ref mut stream) => {
                let image = stream.image().clone();
                stream.get_next_entry()?.map(|entry| self.entry(image, entry))
            }
        };
        if next.is_some() {
            self.listing = Some(listing);
        }
        Ok(next)
    }
}

fn open_host(path: &Path) -> io::Result<ContainerHandle> {
    Ok(Container::open(path)?.into_handle())
}

impl fmt::Debug for MFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MFile")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::stream::ImageBroker;
    use std::io::Write;

    fn registry() -> Registry {
        Registry::with_config(Config::default()).with_broker(Arc::new(ImageBroker::new()))
    }

    fn read_all(file: &MFile) -> String {
        let mut text = String::new();
        file.open().unwrap().read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_json_listing() {
        let mut file = registry().open(r#"json:{"readme.txt":"hello","sub":{"a":"b"}}"#).unwrap();
        assert!(file.is_dir());
        assert_eq!(file.extension(), Some("json".to_string()));

        let first = file.get_next_file_in_dir().unwrap().unwrap();
        assert_eq!(first.name(), "readme.txt");
        assert!(first.is_text());
        assert_eq!(read_all(&first), "hello");
        let second = file.get_next_file_in_dir().unwrap().unwrap();
        assert!(second.is_dir());
        assert!(file.get_next_file_in_dir().unwrap().is_none());
        // A fresh listing after exhaustion.
        assert_eq!(file.get_next_file_in_dir().unwrap().unwrap().name(), "readme.txt");
    }

    #[test]
    fn test_nested_child() {
        let file = registry().open(r#"json:{"sub":{"inner":{"leaf":"x"}}}"#).unwrap();
        let leaf = file.child("sub").unwrap().child("inner").unwrap().child("leaf").unwrap();
        assert_eq!(read_all(&leaf), "x");
        assert!(leaf.url().ends_with("/sub/inner/leaf"));
        assert!(leaf.child("x").unwrap_err() == MediaError::NotADirectory);
    }

    #[test]
    fn test_broker_shares_images() {
        let broker = Arc::new(ImageBroker::new());
        let registry = Registry::new().with_broker(broker.clone());
        let file = registry.open(r#"json:[1,2]"#).unwrap();
        let first = file.image().unwrap();
        let second = file.image().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.len(), 1);
        drop((first, second));
        assert!(broker.is_empty());
    }

    #[test]
    fn test_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::File::create(dir.path().join("b.txt")).unwrap().write_all(b"bee").unwrap();
        fs::File::create(dir.path().join("a.bin")).unwrap().write_all(&[1, 2, 3]).unwrap();

        let registry = registry();
        let mut root = registry.open(dir.path().to_str().unwrap()).unwrap();
        assert!(root.is_dir());
        let names: Vec<String> = std::iter::from_fn(|| root.get_next_file_in_dir().unwrap())
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.bin", "b.txt"]);

        let text = registry.open(dir.path().join("b.txt").to_str().unwrap()).unwrap();
        assert!(!text.is_dir());
        assert!(text.is_text());
        assert_eq!(text.size(), 3);
        assert_eq!(text.type_name(), "TXT");
        assert_eq!(read_all(&text), "bee");
        assert!(text.child("x").unwrap_err() == MediaError::NotADirectory);
        assert!(root.child("missing").unwrap_err() == MediaError::NotFound);
    }
}
