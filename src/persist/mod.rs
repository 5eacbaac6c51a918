// src/persist/mod.rs
//! Persist-or-rollback handling on the receive side.

pub mod memory;
pub mod records;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::handler::MessageHandler;
use crate::message::Envelope;
use crate::metrics::{PersistMetrics, PersistSnapshot};

pub use memory::{MemoryStore, MemoryTransaction, StoreCalls};
pub use records::{
    DependencyRecord, ErrorRecord, EventRecord, MetricRecord, PageViewRecord, RecordHeader,
    RequestRecord, TraceRecord,
};

/// Transactional store. Each [`Transaction`] buffers its own writes, which
/// become visible only when it commits.
///
/// Calls are blocking.
pub trait Store<R>: Send + Sync + 'static {
    type Tx: Transaction<R>;

    fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One unit of work. Dropping it without committing discards its writes.
pub trait Transaction<R>: Send + 'static {
    fn insert(&mut self, record: R) -> Result<(), StoreError>;

    /// Makes the buffered writes durable, returning how many were written.
    fn commit(&mut self) -> Result<usize, StoreError>;

    /// Discards the buffered writes.
    fn rollback(&mut self) -> Result<(), StoreError>;
}

impl<R, S> Store<R> for Arc<S>
where
    S: Store<R> + ?Sized,
{
    type Tx = S::Tx;

    fn begin(&self) -> Result<S::Tx, StoreError> {
        (**self).begin()
    }
}

/// Inserts and commits `record` in its own transaction, rolling it back on
/// failure. A commit that wrote nothing counts as a failure.
fn write_record<R, S>(store: &S, record: R, message_id: Uuid) -> Result<usize, StoreError>
where
    S: Store<R> + ?Sized,
{
    let mut tx = store.begin()?;
    let result = tx.insert(record).and_then(|()| tx.commit()).and_then(|written| match written {
        0 => Err(StoreError::Rejected("commit wrote no rows".to_string())),
        written => Ok(written),
    });

    if result.is_err() {
        match tx.rollback() {
            Ok(()) => debug!(message_id = %message_id, "Rolled back pending writes"),
            Err(e) => error!(message_id = %message_id, "Rollback failed: {}", e),
        }
    }
    result
}

/// Maps an envelope onto its storage row.
pub trait ToRecord {
    type Record: Send + 'static;

    fn to_record(&self) -> Self::Record;
}

/// Stores every received message, rolling back when the store fails.
///
/// Failures are logged with the message id and counted as dropped; they are
/// never returned, since the delivery is already acknowledged.
pub struct PersistHandler<M, S> {
    store: Arc<S>,
    metrics: Arc<PersistMetrics>,
    _message: PhantomData<fn(M)>,
}

impl<M, S> PersistHandler<M, S>
where
    M: Envelope + ToRecord,
    S: Store<M::Record>,
{
    pub fn new(store: S) -> Self {
        Self::shared(Arc::new(store))
    }

    pub fn shared(store: Arc<S>) -> Self {
        PersistHandler {
            store,
            metrics: Arc::new(PersistMetrics::new()),
            _message: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> PersistSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl<M, S> MessageHandler<M> for PersistHandler<M, S>
where
    M: Envelope + ToRecord,
    S: Store<M::Record>,
{
    async fn handle(&self, message: M) -> anyhow::Result<()> {
        let message_id = message.id();
        let record = message.to_record();

        let store = Arc::clone(&self.store);
        let outcome =
            tokio::task::spawn_blocking(move || write_record(&*store, record, message_id)).await;

        match outcome {
            Ok(Ok(written)) => {
                self.metrics.record_persisted();
                debug!(
                    message_id = %message_id,
                    kind = M::KIND.as_str(),
                    written,
                    "Persisted message"
                );
            }
            Ok(Err(e)) => {
                error!(
                    message_id = %message_id,
                    kind = M::KIND.as_str(),
                    "Failed to persist message: {}",
                    e
                );
                self.metrics.record_dropped();
            }
            // The transaction was dropped with the task, discarding its writes.
            Err(e) => {
                error!(
                    message_id = %message_id,
                    kind = M::KIND.as_str(),
                    "Persistence task failed: {}",
                    e
                );
                self.metrics.record_dropped();
            }
        }

        Ok(())
    }
}
