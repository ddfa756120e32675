use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    InvalidHeader,
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    CorruptedLog(String),
    LockError(io::Error),
    // Epoch, key, fragment or tag absent when required to exist
    NotFound(String),
    // Row index beyond a non-growable chunk
    OutOfRange { index: u32, capacity: u32 },
    // Allocation of the given number of bytes failed
    OutOfMemory(usize),
    InternalInconsistency(String),
    ReadOnly,
    Decompression(String),
    InvalidData(String),
    InvalidInput(String),
}

/// Coarse classification of an [`Error`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    OutOfRange,
    OutOfMemory,
    InternalInconsistency,
    ReadOnly,
    Corruption,
    Io,
    InvalidInput,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IoError(_) | Error::LockError(_) => ErrorKind::Io,
            Error::InvalidHeader
            | Error::Decode(..)
            | Error::Encode(..)
            | Error::CorruptedLog(_)
            | Error::Decompression(_)
            | Error::InvalidData(_) => ErrorKind::Corruption,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::OutOfRange { .. } => ErrorKind::OutOfRange,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::InternalInconsistency(_) => ErrorKind::InternalInconsistency,
            Error::ReadOnly => ErrorKind::ReadOnly,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Integer status used at the API boundary: `-2` for resource
    /// exhaustion, `-1` for every other failure.
    pub fn code(&self) -> i32 {
        match self.kind() {
            ErrorKind::OutOfMemory => -2,
            _ => -1,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Maps an operation result to the `0` / `-1` / `-2` status convention.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::InvalidHeader => write!(f, "Invalid header"),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::CorruptedLog(msg) => write!(f, "Corrupted log: {}", msg),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::OutOfRange { index, capacity } => {
                write!(f, "Index {} out of range 0..{}", index, capacity)
            }
            Error::OutOfMemory(bytes) => write!(f, "Not enough memory ({} bytes)", bytes),
            Error::InternalInconsistency(msg) => write!(f, "Internal error: {}", msg),
            Error::ReadOnly => write!(f, "Store is open in read-only mode"),
            Error::Decompression(msg) => write!(f, "Decompression failed: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::LockError(err) => Some(err),
            Error::Decode(_, err) | Error::Encode(_, err) => Some(err),
            _ => None,
        }
    }
}
