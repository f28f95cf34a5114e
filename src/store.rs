use std::fmt;

use futures::stream::BoxStream;
use serde_json::Value;

use crate::document::Document;
use crate::pipeline::{Filter, PipelineStage};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a [`DataStore`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("collection {0} does not exist")]
    NoSuchCollection(String),
    #[error("duplicate key in index {index}: {key}")]
    DuplicateKey { index: String, key: String },
    #[error("invalid index specification: {0}")]
    InvalidIndex(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Identifier assigned by the store to an inserted document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Ascending,
    Geo2dSphere,
}

/// Specification of a named index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexModel {
    pub name: String,
    pub keys: Vec<(String, IndexKind)>,
    pub unique: bool,
}

impl IndexModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            unique: false,
        }
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), IndexKind::Ascending));
        self
    }

    pub fn geo_2dsphere(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), IndexKind::Geo2dSphere));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Where the reads issued through a handle are served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    /// Reads may be served by replicas, which scales read-heavy operations.
    SecondaryPreferred,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionHandle {
    pub database: String,
    pub collection: String,
    pub read_preference: ReadPreference,
}

impl CollectionHandle {
    /// The `database.collection` name of the target collection.
    pub fn namespace(&self) -> String {
        namespace(&self.database, &self.collection)
    }
}

pub fn namespace(database: &str, collection: &str) -> String {
    format!("{database}.{collection}")
}

/// Handles returned by [`DataStore::ensure_collection`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionHandles {
    pub primary: CollectionHandle,
    pub secondary: CollectionHandle,
}

impl CollectionHandles {
    pub fn for_collection(database: &str, collection: &str) -> Self {
        let handle = |read_preference| CollectionHandle {
            database: database.to_string(),
            collection: collection.to_string(),
            read_preference,
        };
        Self {
            primary: handle(ReadPreference::Primary),
            secondary: handle(ReadPreference::SecondaryPreferred),
        }
    }
}

/// A failed write of a single document within a bulk insert.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    /// Position of the document in the submitted batch.
    pub index: usize,
    pub error: StoreError,
}

/// Per-document outcome of [`DataStore::insert_many`].
#[derive(Debug, Clone, Default)]
pub struct BulkWriteOutcome {
    /// Positions of the committed documents, with their assigned ids.
    pub inserted: Vec<(usize, DocumentId)>,
    pub failures: Vec<WriteFailure>,
}

impl BulkWriteOutcome {
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// A stream of the documents produced by an aggregation.
pub type DocumentStream = BoxStream<'static, StoreResult<Value>>;

/// Document store used by the workload.
///
/// Implementations are shared by all workers, so they have to take care of
/// their own synchronization (e.g. by pooling connections).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Creates the collection and the indexes if they don't exist yet.
    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        indexes: &[IndexModel],
    ) -> StoreResult<CollectionHandles>;

    async fn insert_one(
        &self,
        handle: &CollectionHandle,
        document: &Document,
    ) -> StoreResult<DocumentId>;

    /// Inserts a batch of documents.
    ///
    /// With `ordered == false`, every document is attempted independently
    /// and per-document failures are reported in the outcome. With
    /// `ordered == true`, the batch stops at the first failure.
    async fn insert_many(
        &self,
        handle: &CollectionHandle,
        documents: &[Document],
        ordered: bool,
    ) -> StoreResult<BulkWriteOutcome>;

    /// Returns any document matching `filter`.
    async fn find_one(
        &self,
        handle: &CollectionHandle,
        filter: &Filter,
    ) -> StoreResult<Option<Document>>;

    /// Runs an aggregation pipeline. The caller is responsible for draining the stream.
    async fn aggregate(
        &self,
        handle: &CollectionHandle,
        pipeline: &[PipelineStage],
    ) -> StoreResult<DocumentStream>;
}
