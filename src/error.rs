//! Error type shared by the image builders, the codec, the relocation
//! engine, and the load/store driver.
//!
//! I/O failures are fatal and propagate unchanged. Undersized buffers and
//! layout mismatches indicate programming errors on the caller's side and
//! carry enough context to identify the offending write. A relocation kind
//! outside the closed set aborts the whole group application; it is never
//! silently skipped.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum AotError {
    /// Underlying file or stream operation failed.
    Io(io::Error),
    /// A caller-supplied buffer is too small: (needed, available).
    Capacity(usize, usize),
    /// Emission produced bytes at a position other than the precomputed
    /// offset for the named part of the image.
    Layout(&'static str),
    /// Relocation record kind byte outside the supported set.
    UnsupportedRelocation(u8),
    /// A relocation record or group declares sizes inconsistent with the
    /// buffer that holds it.
    MalformedGroup(String),
    /// A relocation offset falls outside the code being patched.
    OffsetOutOfBounds(i64),
    /// An ELF image failed structural validation on read-back.
    MalformedImage(String),
    /// A shared library could not be opened.
    DynamicLoad(String),
    /// The bucket-count ladder has no usable entry.
    EmptyHashLadder,
    /// Operation names a method the registry has never seen.
    MissingMethod(String),
}

impl fmt::Display for AotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AotError::Io(e) => write!(f, "i/o error: {}", e),
            AotError::Capacity(needed, avail) => {
                write!(f, "buffer too small: need {} bytes, have {}", needed, avail)
            }
            AotError::Layout(part) => {
                write!(f, "emission position diverged from computed offset at {}", part)
            }
            AotError::UnsupportedRelocation(kind) => {
                write!(f, "unsupported relocation kind {}", kind)
            }
            AotError::MalformedGroup(msg) => write!(f, "malformed relocation group: {}", msg),
            AotError::OffsetOutOfBounds(off) => {
                write!(f, "relocation offset {} outside code bounds", off)
            }
            AotError::MalformedImage(msg) => write!(f, "malformed ELF image: {}", msg),
            AotError::DynamicLoad(msg) => write!(f, "dynamic load failed: {}", msg),
            AotError::EmptyHashLadder => write!(f, "hash bucket ladder has no usable entry"),
            AotError::MissingMethod(name) => write!(f, "no registered method named '{}'", name),
        }
    }
}

impl std::error::Error for AotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AotError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AotError {
    fn from(e: io::Error) -> Self {
        AotError::Io(e)
    }
}
