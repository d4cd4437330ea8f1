use serde::Serialize;
use serde_json::{Map, Value};

use crate::StoreError;

pub mod memory;
pub use memory::*;

pub type Document = Map<String, Value>;

/// Arguments of a plain `find()` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<(String, i32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
}

/// Pull-based stream of result documents.
pub trait DocumentCursor: Iterator<Item = Result<Value, StoreError>> {
    fn close(&mut self) -> Result<(), StoreError>;
}

/// The document store a compiled query runs against.
pub trait DocumentStore {
    type Cursor: DocumentCursor;

    fn find(&self, collection: &str, args: &FindArgs) -> Result<Self::Cursor, StoreError>;

    fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Self::Cursor, StoreError>;

    /// Returns the `_id` of every inserted document, in order.
    fn insert_many(&self, collection: &str, documents: Vec<Document>, ordered: bool) -> Result<Vec<Value>, StoreError>;

    /// Returns the matched count.
    fn update_many(&self, collection: &str, filter: &Value, update: &Value) -> Result<u64, StoreError>;

    /// Returns the deleted count.
    fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;

    /// Atomically applies `update` to the first match and returns it after the update.
    fn find_one_and_increment(&self, collection: &str, filter: &Value, update: &Value) -> Result<Option<Value>, StoreError>;

    fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;
}
