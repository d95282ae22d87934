//! # lfs-batch
//!
//! Client side of the Git LFS (Large File Storage) transfer protocol.
//!
//! This crate provides:
//! - LFS pointer file parsing and generation
//! - A request executor with redirect, transient-retry and credential-refresh handling
//! - A batch coordinator that deduplicates, batches and schedules concurrent transfers
//! - Streaming SHA256 validation of downloaded content
//! - The LFS file locking API
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Read;
//! use std::sync::Arc;
//! use lfs_batch::{pointer, BatchDownloader, BatchSettings, Client, Meta, WorkerPool};
//!
//! // Generate a pointer for content
//! let content = b"Hello, this is a large file";
//! let meta = Meta::from_content(content);
//! let blob = pointer::serialize(&pointer::create(&meta.oid, meta.size as u64));
//! assert!(pointer::is_pointer(&blob));
//!
//! // Download through the Batch API
//! let client = Client::from_git_url("https://github.com/owner/repo.git").unwrap();
//! let downloader = BatchDownloader::new(client, WorkerPool::new(4, 64), BatchSettings::default());
//! let future = downloader.download(
//!     meta,
//!     Arc::new(|stream: &mut dyn Read| -> lfs_batch::Result<Vec<u8>> {
//!         let mut content = Vec::new();
//!         stream.read_to_end(&mut content)?;
//!         Ok(content)
//!     }),
//! );
//! let downloaded = future.wait().unwrap();
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod error;
mod meta;
pub mod auth;
pub mod batch;
pub mod client;
pub mod download;
pub mod future;
pub mod io;
pub mod lock;
pub mod pointer;
pub mod pool;
pub mod request;
pub mod settings;
pub mod transport;
pub mod upload;
pub mod worker;

pub use auth::{AuthFetcher, AuthProvider, BasicAuthProvider, CachedAuthProvider, ExternalAuthProvider};
pub use batch::{BatchItem, BatchRequest, BatchResponse, Link, LinkType, Links, ObjectRes, Operation};
pub use client::Client;
pub use download::BatchDownloader;
pub use error::{Error, Result, TransferResult};
pub use future::TransferFuture;
pub use io::{FileStreamProvider, StreamHandler, StreamProvider, StreamValidator};
pub use lock::{Lock, User, VerifyLocksResult};
pub use meta::{Meta, UNKNOWN_SIZE};
pub use pool::WorkerPool;
pub use settings::BatchSettings;
pub use transport::{Transport, UreqTransport};
pub use upload::BatchUploader;

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
