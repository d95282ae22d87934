//! Batched uploads.

use std::sync::Arc;

use crate::batch::{BatchItem, Operation};
use crate::future::TransferFuture;
use crate::io::StreamProvider;
use crate::pool::WorkerPool;
use crate::settings::BatchSettings;
use crate::worker::{BatchWorker, Direction, ObjectTask, TransferState};
use crate::{Client, Meta, Result};

/// Upload direction: PUT content to the upload link, then verify.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadTransfer;

impl Direction for UploadTransfer {
    type Context = Arc<dyn StreamProvider>;
    type Output = Meta;

    const OPERATION: Operation = Operation::Upload;

    fn object_task(
        &self,
        client: &Client,
        state: &TransferState<Self::Context, Meta>,
        item: BatchItem,
    ) -> ObjectTask<Meta> {
        // No upload link: the server already has the object.
        if item.upload_action().is_none() {
            return ObjectTask::Complete(state.meta().clone());
        }
        let client = client.clone();
        let provider = Arc::clone(state.context());
        let meta = state.meta().clone();
        ObjectTask::Work(Box::new(move || {
            client.put_object_with_links(provider.as_ref(), &meta, &item.links)?;
            Ok(meta)
        }))
    }
}

/// Uploads objects through the Batch API.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use lfs_batch::{BatchSettings, BatchUploader, Client, WorkerPool};
///
/// let client = Client::from_git_url("https://github.com/owner/repo.git").unwrap();
/// let uploader = BatchUploader::new(client, WorkerPool::new(4, 64), BatchSettings::default());
///
/// let future = uploader.upload(Arc::new(b"Hello, World!".to_vec())).unwrap();
/// let meta = future.wait().unwrap();
/// println!("uploaded {}", meta);
/// ```
#[derive(Clone)]
pub struct BatchUploader {
    worker: BatchWorker<UploadTransfer>,
}

impl BatchUploader {
    pub fn new(client: Client, pool: WorkerPool, settings: BatchSettings) -> Self {
        BatchUploader {
            worker: BatchWorker::new(client, pool, settings, UploadTransfer),
        }
    }

    /// Hash the content on the calling thread, then enqueue it.
    pub fn upload(&self, provider: Arc<dyn StreamProvider>) -> Result<TransferFuture<Meta>> {
        let meta = Meta::from_reader(provider.stream()?)?;
        Ok(self.upload_meta(meta, provider))
    }

    /// Enqueue content whose metadata is already known.
    pub fn upload_meta(&self, meta: Meta, provider: Arc<dyn StreamProvider>) -> TransferFuture<Meta> {
        self.worker.enqueue(meta, provider)
    }

    pub fn worker(&self) -> &BatchWorker<UploadTransfer> {
        &self.worker
    }
}
