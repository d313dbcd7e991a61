use snafu::Snafu;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the compressed block store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The header is missing, short, or carries the wrong magic.
    #[snafu(display("invalid file format"))]
    InvalidFormat,

    /// The open target refers to a directory.
    #[snafu(display("file cannot be a directory"))]
    IsDirectory,

    /// The filesystem rejected a hole-punch request.
    #[snafu(display(
        "the filesystem does not support punching holes (use xfs or ext4): {source}"
    ))]
    PunchHoleNotSupported { source: io::Error },

    /// An underlying read, write, seek, truncate or sync failure, propagated
    /// verbatim.
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Io { source: io::Error },
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io { source } => source,
            e @ Error::InvalidFormat => io::Error::new(io::ErrorKind::InvalidData, e),
            e @ Error::IsDirectory => io::Error::new(io::ErrorKind::Other, e),
            e @ Error::PunchHoleNotSupported { .. } => {
                io::Error::new(io::ErrorKind::Unsupported, e)
            }
        }
    }
}
