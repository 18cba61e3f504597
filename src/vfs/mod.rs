//! Path-addressable files over host directories, container images, and
//! synthetic sources.
//!
//! A `Registry` holds an ordered list of filesystems.  Each one claims
//! names by extension or URL scheme, and the first filesystem that claims a
//! name handles it, so registration order decides between overlapping
//! claims.  Resolving a path yields an `MFile`; a file that a container
//! filesystem claims can be listed and descended into, to any depth.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::MediaError;
use crate::format::{extension_of, synthetic, Format};
use crate::progress::Progress;
use crate::stream::{Container, ContainerHandle, ImageBroker, MediaImage};

mod mfile;

pub use self::mfile::MFile;

/// A family of files the registry can resolve.
pub trait MFileSystem: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this filesystem claims `name`, by its extension or its URL
    /// scheme.
    fn handles(&self, name: &str) -> bool;

    /// Whether this filesystem claims entries carrying the format hint
    /// `hint` (a lowercase extension or scheme).
    fn handles_hint(&self, _hint: &str) -> bool {
        false
    }

    /// For filesystems whose content comes from the URL itself, generate
    /// that content.  Returns None for URLs naming other sources.
    fn source(&self, _url: &str) -> Option<io::Result<Container>> {
        None
    }

    /// Whether files claimed by this filesystem hold entries.
    fn is_container(&self) -> bool;

    /// Parse `container` into a media image for `url`.
    fn decode_image(&self, url: &str, container: ContainerHandle, progress: Progress) -> io::Result<MediaImage>;
}

/// The filesystem for one `Format`.
pub struct FormatFileSystem {
    format: Format,
}

impl FormatFileSystem {
    pub fn new(format: Format) -> FormatFileSystem {
        FormatFileSystem { format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn has_scheme(&self, url: &str) -> bool {
        match (self.format.scheme(), url.split_once(':')) {
            (Some(scheme), Some((prefix, _))) => scheme.eq_ignore_ascii_case(prefix),
            _ => false,
        }
    }
}

impl MFileSystem for FormatFileSystem {
    fn name(&self) -> &str {
        self.format.name()
    }

    fn handles(&self, name: &str) -> bool {
        if self.format.scheme().is_some() {
            return self.has_scheme(name);
        }
        match extension_of(name) {
            Some(extension) => self.format.extensions().contains(&extension.as_str()),
            None => false,
        }
    }

    fn handles_hint(&self, hint: &str) -> bool {
        self.format.extensions().contains(&hint) || self.format.scheme() == Some(hint)
    }

    fn source(&self, url: &str) -> Option<io::Result<Container>> {
        if !self.has_scheme(url) {
            return None;
        }
        let (format, data) = synthetic::parse_url(url)?;
        Some(synthetic::generate(format, data))
    }

    fn is_container(&self) -> bool {
        self.format.is_container()
    }

    fn decode_image(&self, url: &str, container: ContainerHandle, progress: Progress) -> io::Result<MediaImage> {
        if !self.is_container() {
            return Err(MediaError::NotADirectory.into());
        }
        MediaImage::open(url, container, Some(self.format), progress)
    }
}

/// Schemes first, so that URL-looking names never fall through to an
/// extension match.
static DEFAULT_FORMATS: [Format; 11] = [
    Format::Json,
    Format::Sha256,
    Format::Qr,
    Format::G64,
    Format::D64,
    Format::D71,
    Format::D81,
    Format::Lnx,
    Format::T64,
    Format::Tcrt,
    Format::Dfi,
];

/// An ordered set of filesystems plus the configuration and image broker
/// used by every file resolved through it.  Cloning is cheap.
#[derive(Clone)]
pub struct Registry {
    filesystems: Arc<Vec<Arc<dyn MFileSystem>>>,
    config: Config,
    broker: Option<Arc<ImageBroker>>,
}

impl Registry {
    /// A registry with every built-in format and the default configuration.
    pub fn new() -> Registry {
        Registry::with_config(Config::default())
    }

    /// A registry with every built-in format.  Parsed images are shared
    /// through the process-wide broker unless `config.cache_images` is
    /// off.
    pub fn with_config(config: Config) -> Registry {
        let broker = if config.cache_images {
            Some(ImageBroker::global())
        } else {
            None
        };
        let filesystems: Vec<Arc<dyn MFileSystem>> = DEFAULT_FORMATS
            .iter()
            .map(|&format| Arc::new(FormatFileSystem::new(format)) as Arc<dyn MFileSystem>)
            .collect();
        Registry {
            filesystems: Arc::new(filesystems),
            config,
            broker,
        }
    }

    /// Share parsed images through `broker` instead.
    pub fn with_broker(mut self, broker: Arc<ImageBroker>) -> Registry {
        self.broker = Some(broker);
        self
    }

    /// Add `filesystem` after every filesystem already registered.
    pub fn register(&mut self, filesystem: Arc<dyn MFileSystem>) {
        Arc::make_mut(&mut self.filesystems).push(filesystem);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> Option<&Arc<ImageBroker>> {
        self.broker.as_ref()
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.config.limits)
    }

    /// The first filesystem claiming `name`.
    pub fn find(&self, name: &str) -> Option<Arc<dyn MFileSystem>> {
        self.filesystems.iter().find(|fs| fs.handles(name)).cloned()
    }

    /// The first filesystem claiming the format hint `hint`.
    pub fn find_hint(&self, hint: &str) -> Option<Arc<dyn MFileSystem>> {
        self.filesystems.iter().find(|fs| fs.handles_hint(hint)).cloned()
    }

    /// Parse `container` with `filesystem`, sharing the result through the
    /// broker under `url`.
    pub(crate) fn obtain_image<F>(
        &self,
        url: &str,
        filesystem: &Arc<dyn MFileSystem>,
        container: F,
    ) -> io::Result<Arc<MediaImage>>
    where
        F: FnOnce() -> io::Result<ContainerHandle>,
    {
        let open = || filesystem.decode_image(url, container()?, self.progress());
        match self.broker {
            Some(ref broker) => broker.obtain(url, open),
            None => Ok(Arc::new(open()?)),
        }
    }

    /// Resolve `path` to a file.  A synthetic URL is opened whole.  Any
    /// other path is resolved against the host filesystem as far as it
    /// exists there, and the remaining components are looked up inside the
    /// containers found along the way.
    pub fn open(&self, path: &str) -> io::Result<MFile> {
        for filesystem in self.filesystems.iter() {
            if let Some(container) = filesystem.source(path) {
                debug!(url = path, filesystem = filesystem.name(), "opening synthetic source");
                return Ok(MFile::source(self.clone(), path, filesystem.clone(), container?.into_handle()));
            }
        }

        let mut host = PathBuf::from(path);
        let mut remaining = Vec::new();
        while !host.exists() {
            let name = match host.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => return Err(MediaError::NotFound.into()),
            };
            remaining.push(name);
            if !host.pop() {
                return Err(MediaError::NotFound.into());
            }
        }
        debug!(host = %host.display(), remaining = remaining.len(), "resolved host prefix");

        let mut file = MFile::host(self.clone(), host);
        for name in remaining.iter().rev() {
            file = file.child(name)?;
        }
        Ok(file)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = self.filesystems.iter().map(|fs| fs.name()).collect();
        f.debug_struct("Registry")
            .field("filesystems", &names)
            .field("config", &self.config)
            .finish()
    }
}
