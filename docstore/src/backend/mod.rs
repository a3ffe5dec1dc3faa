//! Backend abstraction for the document store.
//!
//! The [`SearchBackend`] trait seams the conventions layer from the concrete
//! search engine client, enabling dependency injection and mock backends in
//! tests. The only shipped implementation is [`OpenSearchBackend`].

mod opensearch;

pub use self::opensearch::OpenSearchBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StoreError;

/// Raw document and index operations against the search engine.
///
/// Implementations translate backend-specific failures into [`StoreError`]
/// before returning, so every caller above this seam sees only the closed
/// error taxonomy. All implementations must be `Send + Sync` for use across
/// async tasks.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Strict create: fails with [`StoreError::Conflict`] if a document with
    /// this identifier already exists.
    async fn create_document(&self, index: &str, id: &str, body: Value)
        -> Result<(), StoreError>;

    /// Fetch a document by identifier. Returns the raw get response
    /// (`_id`, `_source`, ...). Fails with [`StoreError::NotFound`] if absent.
    async fn get_document(&self, index: &str, id: &str) -> Result<Value, StoreError>;

    /// Partial-document update (`{"doc": {...}}` body). Fails with
    /// [`StoreError::NotFound`] if the document does not exist.
    async fn update_document(&self, index: &str, id: &str, body: Value)
        -> Result<(), StoreError>;

    /// Full-document write, replacing any existing document with this
    /// identifier.
    async fn index_document(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError>;

    /// Delete a document by identifier. Fails with [`StoreError::NotFound`]
    /// if absent.
    async fn delete_document(&self, index: &str, id: &str) -> Result<(), StoreError>;

    /// Execute a bulk request. `actions` holds the action/metadata and
    /// document lines in order. Returns the raw bulk response; item-level
    /// failures are reported there, not as errors.
    async fn bulk(&self, index: &str, actions: Vec<Value>) -> Result<Value, StoreError>;

    /// Execute a search request and return the raw response envelope
    /// (`hits.hits`, `hits.total`, ...).
    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError>;

    /// Execute a count-only request and return the match count.
    async fn count(&self, index: &str, body: Value) -> Result<u64, StoreError>;

    /// Make recent writes to the index visible to subsequent searches.
    async fn refresh(&self, index: &str) -> Result<(), StoreError>;

    /// Whether an index exists in the backend.
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError>;

    /// Create an index with the given settings/mappings body. Fails with
    /// [`StoreError::Conflict`] if the index already exists.
    async fn create_index(&self, index: &str, body: Value) -> Result<(), StoreError>;

    /// Delete an index.
    async fn delete_index(&self, index: &str) -> Result<(), StoreError>;

    /// Raw index metadata (aliases, mappings, settings), keyed by concrete
    /// index name.
    async fn index_info(&self, index: &str) -> Result<Value, StoreError>;

    /// Raw index statistics (document counts, indexing activity).
    async fn index_stats(&self, index: &str) -> Result<Value, StoreError>;
}
