//! Share parsed media images between everything that opens the same URL.
//!
//! The broker holds only weak references, so an image is evicted as soon
//! as the last stream, file or caller holding it lets go.  Each checkout
//! gets its own `MediaStream`; only the image's header and entry table are
//! shared.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::stream::MediaImage;

#[derive(Default)]
pub struct ImageBroker {
    images: Mutex<HashMap<String, Weak<MediaImage>>>,
}

impl ImageBroker {
    pub fn new() -> ImageBroker {
        ImageBroker::default()
    }

    /// The process-wide broker.
    pub fn global() -> Arc<ImageBroker> {
        static GLOBAL: OnceLock<Arc<ImageBroker>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ImageBroker::new())).clone()
    }

    /// Return the live image for `url`, if one is cached.
    pub fn get(&self, url: &str) -> Option<Arc<MediaImage>> {
        self.images.lock().get(url).and_then(Weak::upgrade)
    }

    /// Return the shared image for `url`, calling `open` to parse it if no
    /// live image is cached.
    ///
    /// `open` runs without the broker lock held, so it may itself obtain
    /// other images (a container nested inside another, for instance).  If
    /// two callers race to open the same URL, the first one to finish wins
    /// and the other's result is discarded.
    pub fn obtain<F>(&self, url: &str, open: F) -> io::Result<Arc<MediaImage>>
    where
        F: FnOnce() -> io::Result<MediaImage>,
    {
        if let Some(image) = self.get(url) {
            debug!(url, "image cache hit");
            return Ok(image);
        }
        debug!(url, "image cache miss");
        let opened = Arc::new(open()?);

        let mut images = self.images.lock();
        images.retain(|_, image| image.strong_count() > 0);
        if let Some(image) = images.get(url).and_then(Weak::upgrade) {
            return Ok(image);
        }
        images.insert(url.to_string(), Arc::downgrade(&opened));
        Ok(opened)
    }

    /// Forget the image for `url`.  Streams already holding it keep working.
    pub fn evict(&self, url: &str) -> bool {
        self.images.lock().remove(url).is_some()
    }

    pub fn clear(&self) {
        self.images.lock().clear();
    }

    /// The number of live cached images.
    pub fn len(&self) -> usize {
        self.images
            .lock()
            .values()
            .filter(|image| image.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ImageBroker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ImageBroker").field("images", &self.len()).finish()
    }
}
