use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::document::Document;
use crate::pipeline::{apply_pipeline, Filter, PipelineStage};
use crate::store::{
    namespace, BulkWriteOutcome, CollectionHandle, CollectionHandles, DataStore, DocumentId,
    DocumentStream, IndexModel, StoreError, StoreResult, WriteFailure,
};

/// Number of documents kept per collection by [`InMemoryStore::new`].
pub const DEFAULT_MAX_DOCUMENTS: usize = 100_000;

/// A [`DataStore`] which keeps all the collections in the process memory.
///
/// Indexes are only bookkept, with the exception of unique indexes
/// which are enforced on insert. Both handles returned by
/// `ensure_collection` point to the same data, the read preference is
/// not relevant for a single copy.
///
/// Every collection holds at most `max_documents` documents. Once the limit
/// is reached, each insert evicts the oldest document, so long runs keep
/// a bounded memory footprint. Documents are shared behind an `Arc`, so
/// an aggregation only copies pointers while holding the store lock and
/// evaluates the pipeline after releasing it.
pub struct InMemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    max_documents: usize,
}

struct Collection {
    documents: VecDeque<(DocumentId, Arc<Value>)>,
    indexes: Vec<IndexModel>,
    // Index name -> keys already present in that unique index.
    unique_keys: HashMap<String, HashSet<String>>,
    max_documents: usize,
}

impl Collection {
    fn new(max_documents: usize) -> Self {
        Self {
            documents: VecDeque::new(),
            indexes: Vec::new(),
            unique_keys: HashMap::new(),
            max_documents,
        }
    }

    fn add_index(&mut self, index: &IndexModel) -> StoreResult<()> {
        if index.keys.is_empty() {
            return Err(StoreError::InvalidIndex(format!(
                "index {} has no keys",
                index.name
            )));
        }
        if let Some(existing) = self.indexes.iter().find(|i| i.name == index.name) {
            if existing != index {
                return Err(StoreError::InvalidIndex(format!(
                    "index {} already exists with a different specification",
                    index.name
                )));
            }
            return Ok(());
        }

        if index.unique {
            let mut keys = HashSet::with_capacity(self.documents.len());
            for (_, body) in &self.documents {
                let key = index_key(index, body);
                if !keys.insert(key.clone()) {
                    return Err(StoreError::DuplicateKey {
                        index: index.name.clone(),
                        key,
                    });
                }
            }
            self.unique_keys.insert(index.name.clone(), keys);
        }
        self.indexes.push(index.clone());
        Ok(())
    }

    fn insert(&mut self, document: &Document) -> StoreResult<DocumentId> {
        let mut body =
            serde_json::to_value(document).map_err(|err| StoreError::Command(err.to_string()))?;

        let mut new_keys = Vec::new();
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index_key(index, &body);
            let taken = self
                .unique_keys
                .get(&index.name)
                .is_some_and(|keys| keys.contains(&key));
            if taken {
                return Err(StoreError::DuplicateKey {
                    index: index.name.clone(),
                    key,
                });
            }
            new_keys.push((index.name.clone(), key));
        }
        for (index, key) in new_keys {
            self.unique_keys.entry(index).or_default().insert(key);
        }

        let id = DocumentId(uuid::Uuid::new_v4().simple().to_string());
        if let Some(object) = body.as_object_mut() {
            object.insert("_id".to_string(), Value::String(id.0.clone()));
        }
        self.documents.push_back((id.clone(), Arc::new(body)));
        while self.documents.len() > self.max_documents {
            self.evict_oldest();
        }
        Ok(id)
    }

    fn evict_oldest(&mut self) {
        let Some((_, body)) = self.documents.pop_front() else {
            return;
        };
        for index in self.indexes.iter().filter(|i| i.unique) {
            if let Some(keys) = self.unique_keys.get_mut(&index.name) {
                keys.remove(&index_key(index, &body));
            }
        }
    }
}

fn index_key(index: &IndexModel, body: &Value) -> String {
    let values: Vec<&Value> = index
        .keys
        .iter()
        .map(|(field, _)| body.get(field).unwrap_or(&Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_max_documents(DEFAULT_MAX_DOCUMENTS)
    }

    /// Creates a store which keeps at most `max_documents` per collection.
    pub fn with_max_documents(max_documents: usize) -> Self {
        assert!(max_documents > 0, "max_documents must not be zero");
        Self {
            collections: Mutex::new(HashMap::new()),
            max_documents,
        }
    }

    pub fn max_documents(&self) -> usize {
        self.max_documents
    }

    /// Number of documents stored in the `database.collection` namespace,
    /// if it exists.
    pub fn count(&self, namespace: &str) -> Option<usize> {
        self.collections
            .lock()
            .get(namespace)
            .map(|c| c.documents.len())
    }

    /// Names of the indexes created in the namespace, in creation order.
    pub fn index_names(&self, namespace: &str) -> Vec<String> {
        self.collections
            .lock()
            .get(namespace)
            .map(|c| c.indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    fn with_collection<T>(
        &self,
        handle: &CollectionHandle,
        f: impl FnOnce(&mut Collection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut collections = self.collections.lock();
        let collection = collections
            .get_mut(&handle.namespace())
            .ok_or_else(|| StoreError::NoSuchCollection(handle.namespace()))?;
        f(collection)
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        indexes: &[IndexModel],
    ) -> StoreResult<CollectionHandles> {
        if database.is_empty() || collection.is_empty() {
            return Err(StoreError::Command(
                "database and collection names must not be empty".to_string(),
            ));
        }

        let mut collections = self.collections.lock();
        let target = collections
            .entry(namespace(database, collection))
            .or_insert_with(|| Collection::new(self.max_documents));
        for index in indexes {
            target.add_index(index)?;
        }
        Ok(CollectionHandles::for_collection(database, collection))
    }

    async fn insert_one(
        &self,
        handle: &CollectionHandle,
        document: &Document,
    ) -> StoreResult<DocumentId> {
        self.with_collection(handle, |c| c.insert(document))
    }

    async fn insert_many(
        &self,
        handle: &CollectionHandle,
        documents: &[Document],
        ordered: bool,
    ) -> StoreResult<BulkWriteOutcome> {
        self.with_collection(handle, |c| {
            let mut outcome = BulkWriteOutcome::default();
            for (index, document) in documents.iter().enumerate() {
                match c.insert(document) {
                    Ok(id) => outcome.inserted.push((index, id)),
                    Err(error) => {
                        outcome.failures.push(WriteFailure { index, error });
                        if ordered {
                            break;
                        }
                    }
                }
            }
            Ok(outcome)
        })
    }

    async fn find_one(
        &self,
        handle: &CollectionHandle,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let found = self.with_collection(handle, |c| {
            Ok(c.documents
                .iter()
                .find(|(_, body)| filter.matches(body))
                .map(|(_, body)| Value::clone(body)))
        })?;

        found
            .map(|body| serde_json::from_value(body))
            .transpose()
            .map_err(|err| StoreError::Command(err.to_string()))
    }

    async fn aggregate(
        &self,
        handle: &CollectionHandle,
        pipeline: &[PipelineStage],
    ) -> StoreResult<DocumentStream> {
        // Only the pointers are copied under the lock.
        let snapshot: Vec<Arc<Value>> = self.with_collection(handle, |c| {
            Ok(c.documents.iter().map(|(_, body)| Arc::clone(body)).collect())
        })?;

        let results = snapshot
            .into_iter()
            .map(|body| apply_pipeline(pipeline, Arc::unwrap_or_clone(body)))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|err| StoreError::Command(err.to_string()))?;

        Ok(stream::iter(results.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::document::DocumentGenerator;
    use crate::pipeline::Expression;
    use crate::RngGen;

    fn docs(n: usize) -> Vec<Document> {
        let mut gen = DocumentGenerator::with_rng(RngGen::new(7));
        (0..n).map(|_| gen.generate()).collect()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryStore::new();
        let handles = store.ensure_collection("db", "c", &[]).await.unwrap();

        let docs = docs(10);
        for doc in &docs {
            store.insert_one(&handles.primary, doc).await.unwrap();
        }
        assert_eq!(store.count("db.c"), Some(10));

        let target = &docs[3];
        let filter = Filter::new()
            .eq("first_name", target.first_name.as_str())
            .eq("last_name", target.last_name.as_str());
        let found = store.find_one(&handles.primary, &filter).await.unwrap();
        let found = found.unwrap();
        assert_eq!(found.first_name, target.first_name);
        assert_eq!(found.last_name, target.last_name);

        let filter = Filter::new().eq("first_name", "Nobody");
        assert!(store
            .find_one(&handles.secondary, &filter)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryStore::new();
        let handle = CollectionHandles::for_collection("db", "missing").primary;
        let err = store.insert_one(&handle, &docs(1)[0]).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchCollection(_)));
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let store = InMemoryStore::new();
        let indexes = [
            IndexModel::new("idx_ts").ascending("ts"),
            IndexModel::new("idx_location").geo_2dsphere("location"),
        ];
        store.ensure_collection("db", "c", &indexes).await.unwrap();
        store.ensure_collection("db", "c", &indexes).await.unwrap();
        assert_eq!(store.index_names("db.c"), vec!["idx_ts", "idx_location"]);

        let conflicting = [IndexModel::new("idx_ts").ascending("vehicleid")];
        store
            .ensure_collection("db", "c", &conflicting)
            .await
            .unwrap_err();
        store
            .ensure_collection("db", "c", &[IndexModel::new("empty")])
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_unordered_insert_many_continues_after_failure() {
        let store = InMemoryStore::new();
        let unique = IndexModel::new("idx_vehicle_unique")
            .ascending("vehicleid")
            .unique();
        let handles = store.ensure_collection("db", "c", &[unique]).await.unwrap();

        let mut batch = docs(5);
        batch[1].vehicleid = 1;
        batch[2].vehicleid = 1;
        batch[3].vehicleid = 2;
        batch[4].vehicleid = 3;
        batch[0].vehicleid = 4;

        let outcome = store
            .insert_many(&handles.primary, &batch, false)
            .await
            .unwrap();
        assert_eq!(outcome.inserted_count(), 4);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(outcome.failures[0].index, 2);
        assert!(matches!(
            outcome.failures[0].error,
            StoreError::DuplicateKey { .. }
        ));
        let inserted: Vec<usize> = outcome.inserted.iter().map(|(i, _)| *i).collect();
        assert_eq!(inserted, vec![0, 1, 3, 4]);
        assert_eq!(store.count("db.c"), Some(4));
    }

    #[tokio::test]
    async fn test_ordered_insert_many_stops_at_failure() {
        let store = InMemoryStore::new();
        let unique = IndexModel::new("idx_vehicle_unique")
            .ascending("vehicleid")
            .unique();
        let handles = store.ensure_collection("db", "c", &[unique]).await.unwrap();

        let mut batch = docs(4);
        for (i, doc) in batch.iter_mut().enumerate() {
            doc.vehicleid = i as i64;
        }
        batch[2].vehicleid = 0;

        let outcome = store
            .insert_many(&handles.primary, &batch, true)
            .await
            .unwrap();
        assert_eq!(outcome.inserted_count(), 2);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(store.count("db.c"), Some(2));
    }

    #[tokio::test]
    async fn test_aggregate() {
        let store = InMemoryStore::new();
        let handles = store.ensure_collection("db", "c", &[]).await.unwrap();
        for doc in docs(3) {
            store.insert_one(&handles.primary, &doc).await.unwrap();
        }

        let pipeline = [PipelineStage::Set(vec![(
            "lat".to_string(),
            Expression::field("position").array_elem_at(0).to_double(),
        )])];
        let results: Vec<Value> = store
            .aggregate(&handles.secondary, &pipeline)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        for result in results {
            assert!(result["lat"].is_f64());
            assert!(result["_id"].is_string());
        }

        let failing = [PipelineStage::Set(vec![(
            "x".to_string(),
            Expression::literal(json!("not a number")).to_double(),
        )])];
        store
            .aggregate(&handles.secondary, &failing)
            .await
            .map(|_| ())
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_oldest_documents_are_evicted() {
        let store = InMemoryStore::with_max_documents(5);
        let unique = IndexModel::new("idx_vehicle_unique")
            .ascending("vehicleid")
            .unique();
        let handles = store.ensure_collection("db", "c", &[unique]).await.unwrap();

        let mut batch = docs(8);
        for (i, doc) in batch.iter_mut().enumerate() {
            doc.vehicleid = i as i64;
        }
        let outcome = store
            .insert_many(&handles.primary, &batch, false)
            .await
            .unwrap();
        assert_eq!(outcome.inserted_count(), 8);
        assert_eq!(store.count("db.c"), Some(5));

        // The unique key of an evicted document is free again.
        let mut reused = docs(1).remove(0);
        reused.vehicleid = 0;
        store.insert_one(&handles.primary, &reused).await.unwrap();
        // Still present, so still taken.
        reused.vehicleid = 7;
        let err = store.insert_one(&handles.primary, &reused).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(store.count("db.c"), Some(5));
    }

    #[tokio::test]
    async fn test_databases_are_separate() {
        let store = InMemoryStore::new();
        let first = store.ensure_collection("one", "c", &[]).await.unwrap();
        store.ensure_collection("two", "c", &[]).await.unwrap();
        assert_eq!(first.primary.namespace(), "one.c");
        assert_eq!(first.secondary.database, "one");

        store.insert_one(&first.primary, &docs(1)[0]).await.unwrap();
        assert_eq!(store.count("one.c"), Some(1));
        assert_eq!(store.count("two.c"), Some(0));
        assert_eq!(store.count("three.c"), None);
    }
}
