use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("archive truncated: {0}")]
    Truncated(String),

    #[error("signature does not match this format")]
    BadSignature,

    #[error("format limit: {0}")]
    FormatLimit(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("corrupt FAT: {0}")]
    CorruptFat(String),

    #[error("seek or window out of range")]
    OutOfBounds,

    #[error("file handle refers to a removed entry")]
    StaleHandle,

    #[error("archive poisoned by an earlier partial mutation")]
    Poisoned,

    #[error("filter {name}: {msg}")]
    FilterFailed { name: String, msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures that may have left on-disk bytes half-written.
    ///
    /// Validation failures are raised before any byte is touched and
    /// leave the archive clean; anything else escaping a mutation hook
    /// means the on-disk FAT can no longer be trusted.
    pub(crate) fn is_partial_write(&self) -> bool {
        !matches!(
            self,
            Error::FormatLimit(_)
                | Error::InvalidName(_)
                | Error::NotSupported(_)
                | Error::BadSignature
                | Error::StaleHandle
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            Error::OutOfBounds => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "out of range")
            }
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
