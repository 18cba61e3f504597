use std::io;

/// Errors that can be returned from media operations.  These are generally
/// converted into `io::Error`, and can be recovered from one with
/// `MediaError::from_io_error()`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// Unknown error
    #[error("unknown error")]
    Unknown,
    /// The container's signature or layout matches no known format
    #[error("unknown format")]
    UnknownFormat,
    /// Invalid header
    #[error("invalid header")]
    InvalidHeader,
    /// Invalid layout
    #[error("invalid layout")]
    InvalidLayout,
    /// Bad track or sector
    #[error("bad track or sector")]
    InvalidLocation,
    /// Offset out of bounds
    #[error("offset out of bounds")]
    InvalidOffset,
    /// The container ended before a fixed-size structure was complete
    #[error("short read")]
    ShortRead,
    /// A GCR byte could not be decoded to a nibble
    #[error("bad GCR data")]
    BadGcr,
    /// File not found
    #[error("file not found")]
    NotFound,
    /// Entry indexes start at 1
    #[error("invalid entry index")]
    InvalidEntryIndex,
    /// Chain loop detected
    #[error("chain loop detected")]
    ChainLoop,
    /// A traversal ran past its iteration bound
    #[error("chain exceeds the maximum length")]
    ChainTooLong,
    /// Invalid chain link
    #[error("invalid chain link")]
    InvalidChainLink,
    /// The entry uses a structure that can only be partially resolved
    #[error("entry can only be partially resolved")]
    Partial,
    /// Attempt to list something that is not a directory
    #[error("not a directory")]
    NotADirectory,
    /// The traversal was cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,
}

impl From<MediaError> for io::Error {
    fn from(error: MediaError) -> io::Error {
        use std::io::ErrorKind;
        let kind = match error {
            MediaError::Unknown => ErrorKind::Other,
            MediaError::UnknownFormat => ErrorKind::InvalidData,
            MediaError::InvalidHeader => ErrorKind::InvalidData,
            MediaError::InvalidLayout => ErrorKind::InvalidData,
            MediaError::InvalidLocation => ErrorKind::InvalidInput,
            MediaError::InvalidOffset => ErrorKind::InvalidInput,
            MediaError::ShortRead => ErrorKind::UnexpectedEof,
            MediaError::BadGcr => ErrorKind::InvalidData,
            MediaError::NotFound => ErrorKind::NotFound,
            MediaError::InvalidEntryIndex => ErrorKind::InvalidInput,
            MediaError::ChainLoop => ErrorKind::InvalidData,
            MediaError::ChainTooLong => ErrorKind::InvalidData,
            MediaError::InvalidChainLink => ErrorKind::InvalidData,
            MediaError::Partial => ErrorKind::Unsupported,
            MediaError::NotADirectory => ErrorKind::InvalidInput,
            MediaError::Cancelled => ErrorKind::Interrupted,
        };
        io::Error::new(kind, error)
    }
}

impl From<io::Error> for MediaError {
    fn from(error: io::Error) -> MediaError {
        match error.into_inner() {
            Some(e) => match e.downcast_ref::<MediaError>() {
                Some(media_error) => media_error.clone(),
                None => MediaError::Unknown,
            },
            None => MediaError::Unknown,
        }
    }
}

impl MediaError {
    /// If the provided `io::Error` contains a `MediaError`, return the
    /// underlying `MediaError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<MediaError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<MediaError>())
            .cloned()
    }

    /// This is sometimes useful instead of .into() when the compiler doesn't
    /// have enough information to perform type inference.
    pub fn to_io_error(&self) -> io::Error {
        self.clone().into()
    }
}

impl PartialEq<io::Error> for MediaError {
    fn eq(&self, other: &io::Error) -> bool {
        matches!(MediaError::from_io_error(other), Some(ref e) if e == self)
    }
}

impl PartialEq<MediaError> for io::Error {
    fn eq(&self, other: &MediaError) -> bool {
        matches!(MediaError::from_io_error(self), Some(ref e) if e == other)
    }
}
