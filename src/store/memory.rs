use std::{
    collections::VecDeque,
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use indexmap::IndexMap;
use serde_json::{Number, Value};
use uuid::Uuid;

use crate::{
    StoreError,
    store::{Document, DocumentCursor, DocumentStore, FindArgs},
};

/// Every call a [`MemoryStore`] received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Find { collection: String, args: FindArgs },
    Aggregate { collection: String, pipeline: Vec<Value> },
    InsertMany { collection: String, documents: Vec<Document>, ordered: bool },
    UpdateMany { collection: String, filter: Value, update: Value },
    DeleteMany { collection: String, filter: Value },
    FindOneAndIncrement { collection: String, filter: Value, update: Value },
    ListCollectionNames,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: IndexMap<String, Vec<Document>>,
    calls: Vec<StoreCall>,
    results: VecDeque<Vec<Value>>,
    counts: VecDeque<u64>,
    failure: Option<StoreError>,
    closed_cursors: usize,
}

type SharedState = Arc<RwLock<MemoryState>>;

fn lock(state: &SharedState) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
    state.write().map_err(|_| StoreError::new("memory store lock poisoned"))
}

/// In-memory store double.
///
/// Records every call, replays queued result sets for `find`/`aggregate`
/// and keeps inserted documents. Filters and pipelines are not evaluated,
/// except for the equality/`$exists` match and `$inc` update that
/// `find_one_and_increment` needs for sequence allocation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: SharedState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, name: &str, documents: Vec<Value>) -> Self {
        if let Ok(mut state) = lock(&self.state) {
            let docs = documents
                .into_iter()
                .filter_map(|doc| match doc {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            state.collections.insert(name.to_string(), docs);
        }
        self
    }

    /// Queues the documents the next `find`/`aggregate` cursor yields.
    pub fn push_result(&self, documents: Vec<Value>) {
        if let Ok(mut state) = lock(&self.state) {
            state.results.push_back(documents);
        }
    }

    /// Queues the count the next `update_many`/`delete_many` reports.
    pub fn push_count(&self, count: u64) {
        if let Ok(mut state) = lock(&self.state) {
            state.counts.push_back(count);
        }
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut state) = lock(&self.state) {
            state.failure = Some(error);
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.read().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.collections.get(collection).cloned())
            .unwrap_or_default()
    }

    pub fn closed_cursors(&self) -> usize {
        self.state.read().map(|s| s.closed_cursors).unwrap_or_default()
    }

    fn record(&self, call: StoreCall) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        let mut state = lock(&self.state)?;
        state.calls.push(call);
        match state.failure.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    fn cursor(&self, call: StoreCall) -> Result<MemoryCursor, StoreError> {
        let mut state = self.record(call)?;
        let documents = state.results.pop_front().unwrap_or_default();
        Ok(MemoryCursor {
            documents: documents.into_iter().collect(),
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_filter(doc: &Document, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return false;
    };
    filter.iter().all(|(path, expected)| {
        let found = lookup(doc, path);
        match expected.as_object().and_then(|m| m.get("$exists")) {
            Some(Value::Bool(exists)) => found.is_some() == *exists,
            _ => found == Some(expected),
        }
    })
}

fn increment(doc: &mut Document, path: &str, by: &Value) -> Result<(), StoreError> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return Err(StoreError::new("empty $inc path"));
    };

    let mut target = doc;
    for part in parts {
        target = target
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Document::new()))
            .as_object_mut()
            .ok_or_else(|| StoreError::new(format!("cannot apply $inc through non-object '{part}'")))?;
    }

    let current = target.get(last).and_then(Value::as_i64).unwrap_or(0);
    let by = by.as_i64().ok_or_else(|| StoreError::new("$inc amount must be an integer"))?;
    target.insert(last.to_string(), Value::Number(Number::from(current + by)));
    Ok(())
}

impl DocumentStore for MemoryStore {
    type Cursor = MemoryCursor;

    fn find(&self, collection: &str, args: &FindArgs) -> Result<Self::Cursor, StoreError> {
        self.cursor(StoreCall::Find { collection: collection.to_string(), args: args.clone() })
    }

    fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Self::Cursor, StoreError> {
        self.cursor(StoreCall::Aggregate { collection: collection.to_string(), pipeline: pipeline.to_vec() })
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>, ordered: bool) -> Result<Vec<Value>, StoreError> {
        let mut state = self.record(StoreCall::InsertMany {
            collection: collection.to_string(),
            documents: documents.clone(),
            ordered,
        })?;

        let mut ids = Vec::with_capacity(documents.len());
        let stored = state.collections.entry(collection.to_string()).or_default();
        for mut doc in documents {
            let id = doc
                .entry("_id".to_string())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
                .clone();
            ids.push(id);
            stored.push(doc);
        }
        Ok(ids)
    }

    fn update_many(&self, collection: &str, filter: &Value, update: &Value) -> Result<u64, StoreError> {
        let mut state = self.record(StoreCall::UpdateMany {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        })?;
        Ok(state.counts.pop_front().unwrap_or_default())
    }

    fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        let mut state = self.record(StoreCall::DeleteMany {
            collection: collection.to_string(),
            filter: filter.clone(),
        })?;
        Ok(state.counts.pop_front().unwrap_or_default())
    }

    fn find_one_and_increment(&self, collection: &str, filter: &Value, update: &Value) -> Result<Option<Value>, StoreError> {
        let mut state = self.record(StoreCall::FindOneAndIncrement {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        })?;

        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.iter_mut().find(|doc| matches_filter(doc, filter)) else {
            return Ok(None);
        };

        if let Some(inc) = update.get("$inc").and_then(Value::as_object) {
            for (path, by) in inc {
                increment(doc, path, by)?;
            }
        }
        Ok(Some(Value::Object(doc.clone())))
    }

    fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.record(StoreCall::ListCollectionNames)?;
        Ok(state.collections.keys().cloned().collect())
    }
}

/// Cursor over a queued result set.
#[derive(Debug)]
pub struct MemoryCursor {
    documents: VecDeque<Value>,
    state: SharedState,
    closed: bool,
}

impl Iterator for MemoryCursor {
    type Item = Result<Value, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.documents.pop_front().map(Ok)
    }
}

impl DocumentCursor for MemoryCursor {
    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            self.documents.clear();
            lock(&self.state)?.closed_cursors += 1;
        }
        Ok(())
    }
}
