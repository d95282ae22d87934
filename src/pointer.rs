//! LFS pointer file format.
//!
//! LFS pointer files are small text files that replace large files in the Git repository.
//! A pointer is a `version` line followed by `key value` lines in ascending key order:
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393
//! size 12345
//! ```
//!
//! See: https://github.com/git-lfs/git-lfs/blob/main/docs/spec.md

use std::collections::BTreeMap;
use std::io::Read;

/// LFS specification version.
pub const LFS_SPEC_V1: &str = "https://git-lfs.github.com/spec/v1";

/// Maximum size of an LFS pointer file (1KB).
pub const MAX_POINTER_SIZE: usize = 1024;

/// Key of the mandatory first line.
pub const VERSION: &str = "version";

/// Key holding `<algorithm>:<hex digest>`.
pub const OID: &str = "oid";

/// Key holding the content size in bytes.
pub const SIZE: &str = "size";

const PREFIX: &[u8] = b"version ";

/// Keys that must be present, in the order they are matched.
const REQUIRED: [(&str, fn(&str) -> bool); 2] = [(OID, is_valid_oid), (SIZE, is_valid_size)];

/// Pointer contents: every key/value pair, `version` included.
pub type PointerMap = BTreeMap<String, String>;

/// Parse a pointer blob.
///
/// Returns `None` if the blob is not a pointer. Blobs larger than
/// [`MAX_POINTER_SIZE`] are rejected without looking at their content.
pub fn parse(blob: &[u8]) -> Option<PointerMap> {
    if blob.len() > MAX_POINTER_SIZE || !blob.starts_with(PREFIX) {
        return None;
    }

    let mut result = PointerMap::new();
    let mut last_key: Option<&str> = None;
    let mut required = 0;
    let mut rest = blob;
    let mut first = true;

    while !rest.is_empty() {
        let space = rest.iter().position(|&c| !is_key_char(c))?;
        if space == 0 || rest[space] != b' ' {
            return None;
        }
        // Values MUST NOT contain newline characters, so the first one ends the line.
        let newline = space + 1 + rest[space + 1..].iter().position(|&c| c == b'\n')?;

        // Key characters are ASCII, already checked above.
        let key = std::str::from_utf8(&rest[..space]).ok()?;
        let value = std::str::from_utf8(&rest[space + 1..newline]).ok()?;

        if let Some((name, is_valid)) = REQUIRED.get(required) {
            if *name == key {
                if !is_valid(value) {
                    return None;
                }
                required += 1;
            }
        }

        if !first {
            if last_key.is_some_and(|last| key <= last) {
                return None;
            }
            last_key = Some(key);
        }
        first = false;

        if result.insert(key.to_string(), value.to_string()).is_some() {
            return None;
        }
        rest = &rest[newline + 1..];
    }

    // Not all required keys were found.
    if required < REQUIRED.len() {
        return None;
    }
    Some(result)
}

/// Read and parse a pointer from a stream.
///
/// At most [`MAX_POINTER_SIZE`] + 1 bytes are consumed; a longer stream is not a pointer.
pub fn parse_reader<R: Read>(reader: R) -> std::io::Result<Option<PointerMap>> {
    let mut buffer = Vec::with_capacity(MAX_POINTER_SIZE + 1);
    reader
        .take(MAX_POINTER_SIZE as u64 + 1)
        .read_to_end(&mut buffer)?;
    Ok(parse(&buffer))
}

/// Check if content is a valid LFS pointer.
pub fn is_pointer(content: &[u8]) -> bool {
    parse(content).is_some()
}

/// Serialize a pointer map.
///
/// The `version` line always comes first and defaults to [`LFS_SPEC_V1`];
/// the remaining keys follow in ascending order.
pub fn serialize(pointer: &PointerMap) -> Vec<u8> {
    let version = pointer.get(VERSION).map(String::as_str).unwrap_or(LFS_SPEC_V1);
    let mut buffer = format!("{} {}\n", VERSION, version);
    for (key, value) in pointer.iter().filter(|(key, _)| key.as_str() != VERSION) {
        buffer.push_str(key);
        buffer.push(' ');
        buffer.push_str(value);
        buffer.push('\n');
    }
    buffer.into_bytes()
}

/// Create a pointer map for a SHA-256 object.
///
/// `oid` is the bare hex digest; the `sha256:` prefix is added here.
pub fn create(oid: &str, size: u64) -> PointerMap {
    let mut pointer = PointerMap::new();
    pointer.insert(VERSION.to_string(), LFS_SPEC_V1.to_string());
    pointer.insert(OID.to_string(), format!("sha256:{}", oid));
    pointer.insert(SIZE.to_string(), size.to_string());
    pointer
}

/// Keys MUST only use the characters `[a-z] [0-9] . -`.
fn is_key_char(c: u8) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'.' || c == b'-'
}

/// `^[0-9a-z]+:[0-9a-f]+$`
fn is_valid_oid(value: &str) -> bool {
    match value.split_once(':') {
        Some((algo, hash)) => {
            !algo.is_empty()
                && algo.bytes().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && !hash.is_empty()
                && hash.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

/// `^\d+$`
fn is_valid_size(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|c| c.is_ascii_digit())
}
