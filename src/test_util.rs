use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::document::Document;
use crate::memory::InMemoryStore;
use crate::pipeline::{Filter, PipelineStage};
use crate::store::{
    BulkWriteOutcome, CollectionHandle, CollectionHandles, DataStore, DocumentId, DocumentStream,
    IndexModel, ReadPreference, StoreError, StoreResult,
};

/// Wraps an [`InMemoryStore`], counts the calls and injects failures.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,

    pub ensure_calls: AtomicUsize,
    pub insert_one_calls: AtomicUsize,
    pub find_calls: AtomicUsize,
    pub aggregate_calls: AtomicUsize,
    /// `(batch size, ordered)` of every `insert_many` call.
    pub insert_many_calls: Mutex<Vec<(usize, bool)>>,
    /// Method name and read preference of the handle, for every data call.
    pub routes: Mutex<Vec<(&'static str, ReadPreference)>>,

    pub fail_ensure: AtomicBool,
    pub fail_insert_one: AtomicBool,
    pub fail_find: AtomicBool,
    pub fail_aggregate: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_calls(&self) -> usize {
        self.insert_one_calls.load(Ordering::SeqCst)
            + self.find_calls.load(Ordering::SeqCst)
            + self.aggregate_calls.load(Ordering::SeqCst)
            + self.insert_many_calls.lock().len()
    }

    /// Read preferences used by the calls of the given method.
    pub fn routes_of(&self, method: &str) -> Vec<ReadPreference> {
        self.routes
            .lock()
            .iter()
            .filter(|(name, _)| *name == method)
            .map(|(_, preference)| *preference)
            .collect()
    }

    fn route(&self, method: &'static str, handle: &CollectionHandle) {
        self.routes.lock().push((method, handle.read_preference));
    }

    fn injected(flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for CountingStore {
    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        indexes: &[IndexModel],
    ) -> StoreResult<CollectionHandles> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.fail_ensure)?;
        self.inner.ensure_collection(database, collection, indexes).await
    }

    async fn insert_one(
        &self,
        handle: &CollectionHandle,
        document: &Document,
    ) -> StoreResult<DocumentId> {
        self.insert_one_calls.fetch_add(1, Ordering::SeqCst);
        self.route("insert_one", handle);
        Self::injected(&self.fail_insert_one)?;
        self.inner.insert_one(handle, document).await
    }

    async fn insert_many(
        &self,
        handle: &CollectionHandle,
        documents: &[Document],
        ordered: bool,
    ) -> StoreResult<BulkWriteOutcome> {
        self.insert_many_calls
            .lock()
            .push((documents.len(), ordered));
        self.route("insert_many", handle);
        self.inner.insert_many(handle, documents, ordered).await
    }

    async fn find_one(
        &self,
        handle: &CollectionHandle,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.route("find_one", handle);
        Self::injected(&self.fail_find)?;
        self.inner.find_one(handle, filter).await
    }

    async fn aggregate(
        &self,
        handle: &CollectionHandle,
        pipeline: &[PipelineStage],
    ) -> StoreResult<DocumentStream> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        self.route("aggregate", handle);
        Self::injected(&self.fail_aggregate)?;
        self.inner.aggregate(handle, pipeline).await
    }
}
