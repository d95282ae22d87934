//! Content sources, sinks and the validating download stream.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Meta, Result};

/// Source of object content for uploads.
///
/// Every call opens a fresh stream positioned at the start of the content,
/// so a failed transfer can be retried.
pub trait StreamProvider: Send + Sync {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>>;
}

impl StreamProvider for Vec<u8> {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.clone())))
    }
}

impl StreamProvider for Arc<[u8]> {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(Arc::clone(self))))
    }
}

impl StreamProvider for String {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.clone().into_bytes())))
    }
}

impl StreamProvider for &'static str {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        let content: &'static str = self;
        Ok(Box::new(content.as_bytes()))
    }
}

/// Content stored in a file.
#[derive(Debug, Clone)]
pub struct FileStreamProvider {
    path: PathBuf,
}

impl FileStreamProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStreamProvider {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StreamProvider for FileStreamProvider {
    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// Consumer of downloaded content.
///
/// Implemented for any `Fn(&mut dyn Read) -> Result<T>`.
pub trait StreamHandler<T>: Send + Sync {
    fn accept(&self, stream: &mut dyn Read) -> Result<T>;
}

impl<T, F> StreamHandler<T> for F
where
    F: Fn(&mut dyn Read) -> Result<T> + Send + Sync,
{
    fn accept(&self, stream: &mut dyn Read) -> Result<T> {
        self(stream)
    }
}

/// Reader that checks size and SHA-256 of the content passing through it.
///
/// The stream fails with [`io::ErrorKind::InvalidData`] (wrapping
/// [`Error::Validation`]) as soon as more bytes than declared arrive, or at
/// end of stream when the total size or digest is wrong. A consumer that reads
/// to the end therefore never sees a successful read of corrupt content.
pub struct StreamValidator<R> {
    inner: R,
    meta: Meta,
    digest: Option<Sha256>,
    total: u64,
    failure: Option<&'static str>,
}

impl<R: Read> StreamValidator<R> {
    pub fn new(inner: R, meta: Meta) -> Self {
        StreamValidator {
            inner,
            meta,
            digest: Some(Sha256::new()),
            total: 0,
            failure: None,
        }
    }

    /// The metadata the content is checked against.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    fn check_size(&self) -> std::result::Result<(), &'static str> {
        match self.meta.known_size() {
            Some(size) if size > 0 && self.total > size => Err("input stream too big"),
            _ => Ok(()),
        }
    }

    fn finish(&self, digest: Sha256) -> std::result::Result<(), &'static str> {
        if let Some(size) = self.meta.known_size() {
            if self.total != size {
                return Err("unexpected end of stream");
            }
        }
        if hex::encode(digest.finalize()) != self.meta.oid {
            return Err("invalid stream hash");
        }
        Ok(())
    }

    fn fail(&mut self, message: &'static str) -> io::Error {
        self.digest = None;
        self.failure = Some(message);
        invalid(message)
    }
}

impl<R: Read> Read for StreamValidator<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(message) = self.failure {
            return Err(invalid(message));
        }
        if self.digest.is_none() || buf.is_empty() {
            return Ok(0);
        }
        let read = self.inner.read(buf)?;
        if read == 0 {
            if let Some(digest) = self.digest.take() {
                if let Err(message) = self.finish(digest) {
                    return Err(self.fail(message));
                }
            }
            return Ok(0);
        }
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&buf[..read]);
        }
        self.total += read as u64;
        if let Err(message) = self.check_size() {
            return Err(self.fail(message));
        }
        Ok(read)
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        Error::Validation(message.to_string()),
    )
}
