//! LFS object identity: SHA-256 content hash plus size.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Size used when the object size is not known yet.
pub const UNKNOWN_SIZE: i64 = -1;

const BUFFER_SIZE: usize = 0x10000;

/// LFS object metadata.
///
/// `oid` is the lowercase hex SHA-256 of the content. A negative `size`
/// means the size is unknown (pending downloads looked up by hash only).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta {
    /// The SHA256 OID of the object.
    pub oid: String,
    /// The size of the object in bytes.
    pub size: i64,
}

impl Meta {
    /// Create metadata for a known oid and size.
    pub fn new(oid: impl Into<String>, size: i64) -> Self {
        Meta {
            oid: oid.into(),
            size,
        }
    }

    /// Metadata for an object whose size is not known.
    pub fn unknown_size(oid: impl Into<String>) -> Self {
        Meta::new(oid, UNKNOWN_SIZE)
    }

    /// Compute metadata for in-memory content.
    pub fn from_content(content: &[u8]) -> Self {
        Meta {
            oid: hex::encode(Sha256::digest(content)),
            size: content.len() as i64,
        }
    }

    /// Compute metadata by streaming content from a reader.
    ///
    /// The reader is consumed exactly once.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut size = 0i64;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
            size += read as i64;
        }
        Ok(Meta {
            oid: hex::encode(hasher.finalize()),
            size,
        })
    }

    /// The size, if known.
    pub fn known_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.oid, self.size)
    }
}
