//! Batched downloads.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::batch::{BatchItem, Operation};
use crate::future::TransferFuture;
use crate::io::StreamHandler;
use crate::pool::WorkerPool;
use crate::settings::BatchSettings;
use crate::worker::{BatchWorker, Direction, ObjectTask, TransferState};
use crate::{Client, Error, Meta};

/// Download direction: GET content from the download link, validated.
pub struct DownloadTransfer<T> {
    _output: PhantomData<fn() -> T>,
}

impl<T> Default for DownloadTransfer<T> {
    fn default() -> Self {
        DownloadTransfer { _output: PhantomData }
    }
}

impl<T: Clone + Send + 'static> Direction for DownloadTransfer<T> {
    type Context = Arc<dyn StreamHandler<T>>;
    type Output = T;

    const OPERATION: Operation = Operation::Download;

    fn object_task(&self, client: &Client, state: &TransferState<Self::Context, T>, item: BatchItem) -> ObjectTask<T> {
        if item.download_action().is_none() {
            return ObjectTask::Fail(Error::MissingLink {
                kind: "download",
                oid: item.oid,
            });
        }
        let client = client.clone();
        let handler = Arc::clone(state.context());
        ObjectTask::Work(Box::new(move || {
            let meta = item.meta();
            client.get_object_with_links(&meta, &item.links, handler.as_ref())
        }))
    }
}

/// Downloads objects through the Batch API.
///
/// Each object is passed to its handler through a
/// [`StreamValidator`](crate::StreamValidator). Content left unread by the
/// handler is drained afterwards, so corrupt content fails the object either way.
pub struct BatchDownloader<T: Clone + Send + 'static> {
    worker: BatchWorker<DownloadTransfer<T>>,
}

impl<T: Clone + Send + 'static> Clone for BatchDownloader<T> {
    fn clone(&self) -> Self {
        BatchDownloader {
            worker: self.worker.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> BatchDownloader<T> {
    pub fn new(client: Client, pool: WorkerPool, settings: BatchSettings) -> Self {
        BatchDownloader {
            worker: BatchWorker::new(client, pool, settings, DownloadTransfer::default()),
        }
    }

    /// Enqueue an object; `handler` consumes its content.
    pub fn download(&self, meta: Meta, handler: Arc<dyn StreamHandler<T>>) -> TransferFuture<T> {
        self.worker.enqueue(meta, handler)
    }

    pub fn worker(&self) -> &BatchWorker<DownloadTransfer<T>> {
        &self.worker
    }
}
