//! Batch coordinator shared by uploads and downloads.
//!
//! Objects are enqueued into a pending map keyed by oid. A single batch loop
//! at a time takes up to `limit` pending objects that are not already being
//! transferred, resolves them to links with one batch lookup and hands each
//! item to a per-object transfer task on the [`WorkerPool`].
//!
//! One auth link is shared by a lookup and the transfers it dispatched. When
//! that link is invalidated, transfers still holding it are abandoned and
//! their objects go back to the next lookup.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::join;
use crate::batch::{BatchItem, BatchRequest, BatchResponse, Link, Operation, PATH_BATCH};
use crate::future::TransferFuture;
use crate::pool::{Job, Rejected, WorkerPool};
use crate::request::JsonPost;
use crate::settings::BatchSettings;
use crate::{locked, Client, Error, Meta, Result};

/// Transfer-direction strategy plugged into [`BatchWorker`].
pub trait Direction: Send + Sync + 'static {
    /// Caller-supplied per-object data (content source or sink).
    type Context: Clone + Send + Sync + 'static;
    /// Value a successful transfer resolves to.
    type Output: Clone + Send + 'static;

    const OPERATION: Operation;

    /// Decide what to do with a batch item that carries no error.
    fn object_task(
        &self,
        client: &Client,
        state: &TransferState<Self::Context, Self::Output>,
        item: BatchItem,
    ) -> ObjectTask<Self::Output>;
}

/// Outcome of [`Direction::object_task`].
pub enum ObjectTask<R> {
    /// Resolve now, without a transfer.
    Complete(R),
    /// Fail now, without retries.
    Fail(Error),
    /// Run on the worker pool.
    Work(Box<dyn FnOnce() -> Result<R> + Send>),
}

/// Per-object bookkeeping.
pub struct TransferState<C, R> {
    meta: Meta,
    context: C,
    future: TransferFuture<R>,
    /// Ticket of the transfer task currently assigned to the object.
    assigned: Mutex<Option<u64>>,
    tickets: AtomicU64,
    retry: AtomicU32,
}

impl<C, R> TransferState<C, R> {
    fn new(meta: Meta, context: C) -> Self {
        TransferState {
            meta,
            context,
            future: TransferFuture::new(),
            assigned: Mutex::new(None),
            tickets: AtomicU64::new(0),
            retry: AtomicU32::new(0),
        }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn future(&self) -> &TransferFuture<R> {
        &self.future
    }

    fn is_assigned(&self) -> bool {
        locked(&self.assigned).is_some()
    }

    /// Mark the object as held by a new transfer task.
    fn assign(&self) -> u64 {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        *locked(&self.assigned) = Some(ticket);
        ticket
    }

    /// Return the object to the next lookup, unless a newer task holds it.
    fn release(&self, ticket: u64) {
        let mut assigned = locked(&self.assigned);
        if *assigned == Some(ticket) {
            *assigned = None;
        }
    }
}

impl<C, R> fmt::Debug for TransferState<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferState")
            .field("meta", &self.meta)
            .field("retry", &self.retry.load(Ordering::SeqCst))
            .field("future", &self.future)
            .finish_non_exhaustive()
    }
}

type State<D> = TransferState<<D as Direction>::Context, <D as Direction>::Output>;

/// Deduplicating, batching transfer coordinator.
pub struct BatchWorker<D: Direction> {
    shared: Arc<Shared<D>>,
}

impl<D: Direction> Clone for BatchWorker<D> {
    fn clone(&self) -> Self {
        BatchWorker {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<D: Direction> {
    client: Client,
    pool: WorkerPool,
    settings: BatchSettings,
    direction: D,
    objects: DashMap<String, Arc<State<D>>>,
    batch_sequence: AtomicU64,
    batch_in_progress: AtomicU64,
    in_progress: AtomicUsize,
    current_auth: Mutex<Option<Arc<Link>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Done,
    Retry,
}

impl<D: Direction> BatchWorker<D> {
    pub fn new(client: Client, pool: WorkerPool, settings: BatchSettings, direction: D) -> Self {
        BatchWorker {
            shared: Arc::new(Shared {
                client,
                pool,
                settings,
                direction,
                objects: DashMap::new(),
                batch_sequence: AtomicU64::new(0),
                batch_in_progress: AtomicU64::new(0),
                in_progress: AtomicUsize::new(0),
                current_auth: Mutex::new(None),
            }),
        }
    }

    /// Register an object for transfer.
    ///
    /// While an object is pending, enqueueing it again returns the existing
    /// future and `context` is ignored. A resolved or cancelled entry is replaced.
    ///
    /// Entries are keyed by oid alone: enqueueing a known oid with a different
    /// size reuses the existing state and its size.
    pub fn enqueue(&self, meta: Meta, context: D::Context) -> TransferFuture<D::Output> {
        let state = match self.shared.objects.entry(meta.oid.clone()) {
            Entry::Occupied(mut entry) if entry.get().future.is_done() => {
                let state = Arc::new(TransferState::new(meta, context));
                entry.insert(Arc::clone(&state));
                state
            }
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let state = Arc::new(TransferState::new(meta, context));
                entry.insert(Arc::clone(&state));
                state
            }
        };
        self.shared.start_batch();
        state.future.clone()
    }

    pub fn client(&self) -> &Client {
        &self.shared.client
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.shared.settings
    }

    pub fn direction(&self) -> &D {
        &self.shared.direction
    }

    /// Objects not yet resolved.
    pub fn pending(&self) -> usize {
        self.shared.objects.len()
    }

    /// Transfer tasks submitted and not yet finished.
    pub fn in_progress(&self) -> usize {
        self.shared.in_progress.load(Ordering::SeqCst)
    }
}

impl<D: Direction> Shared<D> {
    fn should_start_batch(&self) -> bool {
        // A zero threshold still lets a batch through when nothing runs.
        self.in_progress.load(Ordering::SeqCst) < self.settings.threshold().max(1) && !self.objects.is_empty()
    }

    fn start_batch(self: &Arc<Self>) {
        if self.pool.is_shutdown() || !self.should_start_batch() {
            return;
        }
        let id = self.batch_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .batch_in_progress
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let marker = BatchMarker {
            shared: Arc::clone(self),
        };
        self.execute(Box::new(move || {
            let shared = Arc::clone(&marker.shared);
            let seen = shared.run_batches();
            drop(marker);
            // Objects enqueued after the last pass saw the marker taken.
            if shared.batch_sequence.load(Ordering::SeqCst) != seen {
                shared.start_batch();
            }
        }));
    }

    /// Run passes until no new work arrived; returns the last observed sequence.
    fn run_batches(self: &Arc<Self>) -> u64 {
        // Credentials are refreshed at most once until a lookup succeeds.
        let mut may_refresh = true;
        loop {
            let seen = self.batch_sequence.load(Ordering::SeqCst);
            let pass = self.submit_batch(&mut may_refresh);
            if !self.should_start_batch() {
                return seen;
            }
            if pass == Pass::Done && self.batch_sequence.load(Ordering::SeqCst) == seen && !self.has_unassigned() {
                return seen;
            }
        }
    }

    /// Whether some pending object waits for a lookup.
    fn has_unassigned(&self) -> bool {
        self.objects
            .iter()
            .any(|entry| !entry.value().future.is_done() && !entry.value().is_assigned())
    }

    fn take_batch(&self) -> Vec<Arc<State<D>>> {
        let limit = self.settings.limit();
        let mut batch = Vec::new();
        let mut finished = Vec::new();
        for entry in self.objects.iter() {
            let state = entry.value();
            if state.future.is_done() {
                finished.push(Arc::clone(state));
            } else if !state.is_assigned() {
                batch.push(Arc::clone(state));
                if batch.len() >= limit {
                    break;
                }
            }
        }
        for state in finished {
            self.remove(&state);
        }
        batch
    }

    fn submit_batch(self: &Arc<Self>, may_refresh: &mut bool) -> Pass {
        let batch = self.take_batch();
        if batch.is_empty() {
            return Pass::Done;
        }
        tracing::debug!(operation = %D::OPERATION, objects = batch.len(), "batch lookup");

        let request = BatchRequest::new(D::OPERATION, batch.iter().map(|state| state.meta.clone()).collect())
            .with_basic_transfer();
        let lookup = |auth: &Link| -> Result<(Arc<Link>, BatchResponse)> {
            let auth = self.share_auth(auth);
            let response: BatchResponse = self.client.do_request(
                Some(&auth),
                &JsonPost::<_, BatchResponse>::new(&request),
                &join(&auth.href, PATH_BATCH)?,
            )?;
            Ok((auth, response))
        };
        let result = if *may_refresh {
            self.client.do_work(D::OPERATION, |auth| lookup(auth))
        } else {
            self.client
                .auth_provider()
                .get_auth(D::OPERATION)
                .and_then(|auth| lookup(&auth))
        };

        match result {
            Ok((auth, response)) => {
                *may_refresh = true;
                self.dispatch(batch, &auth, response);
                Pass::Done
            }
            Err(e) => {
                if e.is_unauthorized() {
                    tracing::debug!(operation = %D::OPERATION, "batch lookup unauthorized, dropping shared credentials");
                    *may_refresh = false;
                    locked(&self.current_auth).take();
                } else {
                    tracing::warn!(operation = %D::OPERATION, error = %e, "batch lookup failed");
                }
                let error = Arc::new(e);
                let mut pending = false;
                for state in &batch {
                    if !self.on_failure(state, &error) {
                        pending = true;
                    }
                }
                if pending {
                    Pass::Retry
                } else {
                    Pass::Done
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<Arc<State<D>>>, auth: &Arc<Link>, response: BatchResponse) {
        let mut items: HashMap<String, BatchItem> = response
            .objects
            .into_iter()
            .map(|item| (item.oid.clone(), item))
            .collect();

        for state in batch {
            let Some(item) = items.remove(&state.meta.oid) else {
                self.fail(&state, Error::MissingObject(state.meta.oid.clone()));
                continue;
            };
            if let Some(error) = &item.error {
                let error = match error.code {
                    404 => Error::NotFound(state.meta.oid.clone()),
                    code => Error::ServerError {
                        code,
                        message: error.message.clone().unwrap_or_default(),
                    },
                };
                self.fail(&state, error);
                continue;
            }
            if state.future.is_done() {
                self.remove(&state);
                continue;
            }

            match self.direction.object_task(&self.client, &state, item) {
                ObjectTask::Complete(value) => {
                    state.future.complete(value);
                    self.remove(&state);
                }
                ObjectTask::Fail(error) => self.fail(&state, error),
                ObjectTask::Work(work) => {
                    let holder = StateHolder::new(Arc::clone(self), state);
                    let auth = Arc::clone(auth);
                    self.execute(Box::new(move || holder.process(&auth, work)));
                }
            }
        }
    }

    /// Make `auth` the shared link, reusing the current one when equal.
    fn share_auth(&self, auth: &Link) -> Arc<Link> {
        let mut current = locked(&self.current_auth);
        match current.as_ref() {
            Some(shared) if **shared == *auth => Arc::clone(shared),
            _ => {
                let shared = Arc::new(auth.clone());
                *current = Some(Arc::clone(&shared));
                shared
            }
        }
    }

    fn is_current_auth(&self, auth: &Arc<Link>) -> bool {
        locked(&self.current_auth)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, auth))
    }

    fn invalidate_auth(&self, auth: &Arc<Link>) {
        let mut current = locked(&self.current_auth);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, auth)) {
            current.take();
            drop(current);
            tracing::debug!(operation = %D::OPERATION, "shared credentials invalidated");
            self.client.auth_provider().invalidate_auth(D::OPERATION, auth);
        }
    }

    /// Count a failed attempt. Returns `true` if the object was failed.
    fn on_failure(&self, state: &Arc<State<D>>, error: &Arc<Error>) -> bool {
        let attempts = state.retry.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts >= self.settings.retry_count() {
            state.future.fail(Arc::clone(error));
            self.remove(state);
            true
        } else {
            false
        }
    }

    fn fail(&self, state: &Arc<State<D>>, error: Error) {
        state.future.fail(Arc::new(error));
        self.remove(state);
    }

    fn remove(&self, state: &Arc<State<D>>) {
        self.objects
            .remove_if(&state.meta.oid, |_, current| Arc::ptr_eq(current, state));
    }

    fn execute(&self, job: Job) {
        match self.pool.execute(job) {
            Ok(()) => {}
            Err(Rejected::Full(job)) => {
                tracing::debug!("worker pool saturated, running task on caller thread");
                job();
            }
            Err(Rejected::Shutdown(job)) => {
                tracing::warn!("worker pool shut down, dropping task");
                drop(job);
            }
        }
    }
}

/// Releases the batch marker when the batch job ends or is dropped.
struct BatchMarker<D: Direction> {
    shared: Arc<Shared<D>>,
}

impl<D: Direction> Drop for BatchMarker<D> {
    fn drop(&mut self) {
        self.shared.batch_in_progress.store(0, Ordering::SeqCst);
    }
}

/// Counts a transfer task as in progress until it ends or is dropped.
///
/// An unresolved object goes back to the next lookup when the holder drops,
/// whether the task ran, failed, panicked or never started.
struct StateHolder<D: Direction> {
    shared: Arc<Shared<D>>,
    state: Arc<State<D>>,
    ticket: u64,
}

impl<D: Direction> StateHolder<D> {
    fn new(shared: Arc<Shared<D>>, state: Arc<State<D>>) -> Self {
        let ticket = state.assign();
        shared.in_progress.fetch_add(1, Ordering::SeqCst);
        StateHolder { shared, state, ticket }
    }

    fn process(self, auth: &Arc<Link>, work: Box<dyn FnOnce() -> Result<D::Output> + Send>) {
        let state = &self.state;
        if state.future.is_done() {
            return;
        }
        if !self.shared.is_current_auth(auth) {
            tracing::debug!(oid = %state.meta.oid, "credentials changed, requeueing object");
            return;
        }

        tracing::trace!(oid = %state.meta.oid, "transfer started");
        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| Err(Error::TaskPanicked(panic_message(payload.as_ref()))));
        match result {
            Ok(value) => {
                state.future.complete(value);
            }
            Err(e) if e.is_unauthorized() => {
                self.shared.invalidate_auth(auth);
            }
            Err(e) if e.is_forbidden() => {
                state.future.fail(Arc::new(e));
            }
            Err(e) => {
                tracing::debug!(oid = %state.meta.oid, error = %e, "transfer failed");
                self.shared.on_failure(state, &Arc::new(e));
            }
        }
        tracing::trace!(oid = %state.meta.oid, "transfer finished");
    }
}

impl<D: Direction> Drop for StateHolder<D> {
    fn drop(&mut self) {
        self.shared.in_progress.fetch_sub(1, Ordering::SeqCst);
        if self.state.future.is_done() {
            self.shared.remove(&self.state);
        } else {
            self.state.release(self.ticket);
        }
        self.shared.start_batch();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
