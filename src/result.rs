//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The file could be read as neither a zip nor a tar-family archive.
    /// Both reasons are kept so callers can tell why each attempt failed.
    #[error("Unsupported archive format (as zip: {zip}; as tar: {tar})")]
    UnsupportedArchiveFormat { zip: String, tar: String },

    /// The zip archive contained invalid data
    #[error("Invalid Zip archive: {0}")]
    InvalidZip(&'static str),

    /// The zip archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedZip(String),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A cast from a 64-bit int to a usize failed while mapping the file,
    /// probably on a 32-bit system.
    #[error("Archive too large for address space")]
    InsufficientAddressSpace,

    /// Rendering the structure as JSON failed
    #[error("Couldn't serialize structure: {0}")]
    Json(#[from] serde_json::Error),

    /// An object store refused an upload
    #[error("Couldn't upload to {key}")]
    Upload {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// An object store has nothing under the given key
    #[error("No object with the key {0}")]
    MissingObject(String),
}
