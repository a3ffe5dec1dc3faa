//! Persistence interface.
//!
//! `Store` offers a relational-store-shaped CRUD-plus-search interface so
//! upstream code can use a consistent persistence API without leaking
//! backend abstractions. Reads delegate to a [`SearchIndex`]; writes go
//! straight to the backend with identifiers and timestamps assigned here.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::backend::SearchBackend;
use crate::errors::StoreError;
use crate::model::Model;
use crate::registry::Index;
use crate::searching::{SearchHit, SearchIndex, SearchParams};

/// Injectable identifier generation, to facilitate mocking.
pub trait IdSource: Send + Sync {
    fn new_id(&self) -> String;
}

/// UUID-v4 string identifiers. String-valued because backend UUID support is
/// not terrific.
pub struct UuidSource;

impl IdSource for UuidSource {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Injectable timestamp generation, to facilitate mocking.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds; the backend supports
    /// `epoch_millis` dates directly.
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// One entry in an ordered bulk write.
#[derive(Debug, Clone)]
pub enum BulkAction<M> {
    /// Index (create or replace) a document.
    Index(M),
    /// Delete a document by identifier.
    Delete(String),
}

/// Outcome of a single item within a bulk batch.
#[derive(Debug, Clone)]
pub struct BulkItemReport {
    /// The document identifier.
    pub id: String,
    /// The operation ("index" or "delete").
    pub op: String,
    /// Whether the item succeeded.
    pub success: bool,
    /// The backend-reported result (e.g. "created", "not_found").
    pub result: Option<String>,
    /// Error detail for failed items.
    pub error: Option<String>,
}

/// Summary of one bulk batch. Item failures are captured here rather than
/// raised; callers must inspect the report for partial failures.
#[derive(Debug, Clone)]
pub struct BulkBatchReport {
    /// Items in this batch.
    pub total: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Per-item outcomes, in submission order.
    pub items: Vec<BulkItemReport>,
}

/// An index and the search index bound to it.
struct Binding<P> {
    index: Index,
    search: SearchIndex<P>,
}

/// Backend persistence interface for models of type `M`.
///
/// `P` is the polymorphic result type searches produce; it defaults to `M`
/// for single-type stores. Several stores over different model types may
/// share one index and one `SearchIndex<P>` for polymorphic storage.
///
/// A store may also carry named routes to additional index/search-index
/// pairs; [`Store::on`] selects one per call.
pub struct Store<M: Model, P = M> {
    backend: Arc<dyn SearchBackend>,
    default: Binding<P>,
    routes: Vec<(String, Binding<P>)>,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
    _model: PhantomData<fn() -> M>,
}

impl<M, P> Store<M, P>
where
    M: Model + Into<P>,
{
    /// Create a store bound to `index`, registering `M` with the search
    /// index so hits resolve back into `M` instances.
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        index: Index,
        mut search_index: SearchIndex<P>,
    ) -> Self {
        search_index.register_doc_type::<M>();
        Self {
            backend,
            default: Binding {
                index,
                search: search_index,
            },
            routes: Vec::new(),
            ids: Arc::new(UuidSource),
            clock: Arc::new(SystemClock),
            _model: PhantomData,
        }
    }

    /// Replace the identifier source (deterministic tests).
    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the clock (deterministic tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a named route to another index/search-index pair. `M` is
    /// registered with that search index as well.
    pub fn with_route(
        mut self,
        key: impl Into<String>,
        index: Index,
        mut search_index: SearchIndex<P>,
    ) -> Self {
        search_index.register_doc_type::<M>();
        self.routes.push((
            key.into(),
            Binding {
                index,
                search: search_index,
            },
        ));
        self
    }

    /// Select a route for subsequent calls. Fails with
    /// [`StoreError::InvalidArgument`] for an unknown key.
    pub fn on(&self, key: &str) -> Result<StoreView<'_, M, P>, StoreError> {
        let binding = self
            .routes
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, binding)| binding)
            .ok_or_else(|| StoreError::invalid_argument(format!("unknown store route: {}", key)))?;
        Ok(StoreView {
            store: self,
            binding,
        })
    }

    /// The default index.
    pub fn index(&self) -> &Index {
        &self.default.index
    }

    /// The shared backend handle.
    pub fn backend(&self) -> Arc<dyn SearchBackend> {
        self.backend.clone()
    }

    /// Generate a new identifier.
    pub fn new_object_id(&self) -> String {
        self.ids.new_id()
    }

    /// Generate a new timestamp in epoch milliseconds.
    pub fn new_timestamp(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Persist a new entity.
    ///
    /// Assigns an identifier if unset and stamps `created_at == updated_at`.
    /// Fails with [`StoreError::Conflict`] if an entity with the identifier
    /// already exists; an existing record is never silently overwritten.
    pub async fn create(&self, instance: M) -> Result<M, StoreError> {
        self.create_in(&self.default, instance).await
    }

    /// Retrieve a model by identifier.
    pub async fn retrieve(&self, identifier: &str) -> Result<M, StoreError> {
        self.retrieve_in(&self.default, identifier).await
    }

    /// Update an existing model with a new one via a partial-document
    /// update, then re-fetch so the returned instance reflects the persisted
    /// record. Fails with [`StoreError::NotFound`] if there is no existing
    /// model.
    pub async fn update(&self, identifier: &str, instance: M) -> Result<M, StoreError> {
        self.update_in(&self.default, identifier, instance).await
    }

    /// Create or update an entity (full-document upsert).
    pub async fn replace(&self, identifier: Option<&str>, instance: M) -> Result<M, StoreError> {
        self.replace_in(&self.default, identifier, instance).await
    }

    /// Delete a model by identifier. Fails with [`StoreError::NotFound`] if
    /// there is no existing model.
    pub async fn delete(&self, identifier: &str) -> Result<(), StoreError> {
        self.delete_in(&self.default, identifier).await
    }

    /// Apply an ordered sequence of actions in fixed-size batches.
    ///
    /// Instances lacking an identifier are assigned one. One backend bulk
    /// call is issued per batch (the last batch may be smaller); item
    /// failures within a batch are captured in the per-batch report, never
    /// raised.
    pub async fn bulk(
        &self,
        actions: Vec<BulkAction<M>>,
        batch_size: usize,
    ) -> Result<Vec<BulkBatchReport>, StoreError> {
        self.bulk_in(&self.default, actions, batch_size).await
    }

    /// Count the models matching some criteria.
    pub async fn count(&self, params: &SearchParams) -> Result<u64, StoreError> {
        self.default.search.count(params).await
    }

    /// Return the models matching some criteria.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchHit<P>>, StoreError> {
        self.default.search.search(params).await
    }

    /// Return the models matching some criteria along with the total match
    /// count.
    pub async fn search_with_count(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<SearchHit<P>>, u64), StoreError> {
        self.default.search.search_with_count(params).await
    }

    /// Run `body`, and on success force recent writes to become visible to
    /// subsequent reads. If `body` fails, no flush is attempted.
    ///
    /// Backend writes are not indexed synchronously; this is mostly useful
    /// for test cases.
    pub async fn flushing<F, Fut, T>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let out = body().await?;
        self.flush().await?;
        Ok(out)
    }

    /// Force recent writes to the default index to become visible.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.backend.refresh(self.default.index.name()).await
    }

    async fn create_in(&self, binding: &Binding<P>, mut instance: M) -> Result<M, StoreError> {
        let now = self.new_timestamp();
        let id = match instance.meta().id.clone() {
            Some(id) => id,
            None => self.new_object_id(),
        };

        let meta = instance.meta_mut();
        meta.id = Some(id.clone());
        meta.created_at = Some(now);
        meta.updated_at = Some(now);
        meta.doctype = M::doctype().to_string();

        let body = to_document(&instance)?;
        self.backend
            .create_document(binding.index.name(), &id, body)
            .await?;
        debug!(index = binding.index.name(), id = %id, doctype = M::doctype(), "created");
        Ok(instance)
    }

    async fn retrieve_in(&self, binding: &Binding<P>, identifier: &str) -> Result<M, StoreError> {
        let doc = self
            .backend
            .get_document(binding.index.name(), identifier)
            .await?;
        let mut source = doc.get("_source").cloned().unwrap_or(Value::Null);
        if let Some(obj) = source.as_object_mut() {
            obj.insert("id".to_string(), json!(identifier));
        }
        serde_json::from_value(source).map_err(|e| {
            StoreError::backend(format!("malformed document {}: {}", identifier, e))
        })
    }

    async fn update_in(
        &self,
        binding: &Binding<P>,
        identifier: &str,
        mut instance: M,
    ) -> Result<M, StoreError> {
        let meta = instance.meta_mut();
        meta.id = Some(identifier.to_string());
        meta.updated_at = Some(self.new_timestamp());
        meta.doctype = M::doctype().to_string();

        let body = json!({ "doc": to_document(&instance)? });
        self.backend
            .update_document(binding.index.name(), identifier, body)
            .await?;
        debug!(index = binding.index.name(), id = identifier, "updated");

        // Return the persisted record so server-assigned fields are visible.
        self.retrieve_in(binding, identifier).await
    }

    async fn replace_in(
        &self,
        binding: &Binding<P>,
        identifier: Option<&str>,
        mut instance: M,
    ) -> Result<M, StoreError> {
        let now = self.new_timestamp();
        let id = match instance.meta().id.clone() {
            Some(id) => id,
            None => identifier
                .map(str::to_string)
                .unwrap_or_else(|| self.new_object_id()),
        };

        let meta = instance.meta_mut();
        meta.id = Some(id.clone());
        if meta.created_at.is_none() {
            meta.created_at = Some(now);
        }
        meta.updated_at = Some(now);
        meta.doctype = M::doctype().to_string();

        let body = to_document(&instance)?;
        self.backend
            .index_document(binding.index.name(), &id, body)
            .await?;
        debug!(index = binding.index.name(), id = %id, "replaced");
        Ok(instance)
    }

    async fn delete_in(&self, binding: &Binding<P>, identifier: &str) -> Result<(), StoreError> {
        self.backend
            .delete_document(binding.index.name(), identifier)
            .await?;
        debug!(index = binding.index.name(), id = identifier, "deleted");
        Ok(())
    }

    async fn bulk_in(
        &self,
        binding: &Binding<P>,
        actions: Vec<BulkAction<M>>,
        batch_size: usize,
    ) -> Result<Vec<BulkBatchReport>, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::invalid_argument("bulk batch size must be positive"));
        }

        // Assign identifiers up front so the reports can name every item.
        let mut prepared = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                BulkAction::Index(mut instance) => {
                    if instance.meta().id.is_none() {
                        instance.meta_mut().id = Some(self.new_object_id());
                    }
                    instance.meta_mut().doctype = M::doctype().to_string();
                    prepared.push(BulkAction::Index(instance));
                }
                delete => prepared.push(delete),
            }
        }

        let mut reports = Vec::new();
        for batch in prepared.chunks(batch_size) {
            let mut lines = Vec::with_capacity(batch.len() * 2);
            for action in batch {
                match action {
                    BulkAction::Index(instance) => {
                        let id = instance.id().unwrap_or_default().to_string();
                        lines.push(json!({
                            "index": { "_index": binding.index.name(), "_id": id }
                        }));
                        lines.push(to_document(instance)?);
                    }
                    BulkAction::Delete(id) => {
                        lines.push(json!({
                            "delete": { "_index": binding.index.name(), "_id": id }
                        }));
                    }
                }
            }

            let response = self.backend.bulk(binding.index.name(), lines).await?;
            reports.push(batch_report(&response, batch.len()));
        }
        Ok(reports)
    }
}

/// Interpret a raw bulk response into a per-batch report.
fn batch_report(response: &Value, total: usize) -> BulkBatchReport {
    let mut items = Vec::new();
    let mut succeeded = 0;
    let mut failed = 0;

    for item in response["items"].as_array().into_iter().flatten() {
        let Some((op, detail)) = item
            .as_object()
            .and_then(|obj| obj.iter().next())
        else {
            continue;
        };

        let status = detail["status"].as_u64().unwrap_or(0);
        let success = (200..300).contains(&status);
        if success {
            succeeded += 1;
        } else {
            failed += 1;
        }

        items.push(BulkItemReport {
            id: detail["_id"].as_str().unwrap_or_default().to_string(),
            op: op.clone(),
            success,
            result: detail["result"].as_str().map(str::to_string),
            error: detail
                .get("error")
                .filter(|e| !e.is_null())
                .map(|e| e.to_string()),
        });
    }

    BulkBatchReport {
        total,
        succeeded,
        failed,
        items,
    }
}

fn to_document<M: Model>(instance: &M) -> Result<Value, StoreError> {
    serde_json::to_value(instance)
        .map_err(|e| StoreError::backend(format!("failed to serialize document: {}", e)))
}

/// A store bound to one of its named routes. Shares the parent store's
/// backend, identifier source, and clock.
pub struct StoreView<'a, M: Model, P> {
    store: &'a Store<M, P>,
    binding: &'a Binding<P>,
}

impl<'a, M, P> StoreView<'a, M, P>
where
    M: Model + Into<P>,
{
    /// The routed index.
    pub fn index(&self) -> &Index {
        &self.binding.index
    }

    pub async fn create(&self, instance: M) -> Result<M, StoreError> {
        self.store.create_in(self.binding, instance).await
    }

    pub async fn retrieve(&self, identifier: &str) -> Result<M, StoreError> {
        self.store.retrieve_in(self.binding, identifier).await
    }

    pub async fn update(&self, identifier: &str, instance: M) -> Result<M, StoreError> {
        self.store.update_in(self.binding, identifier, instance).await
    }

    pub async fn replace(&self, identifier: Option<&str>, instance: M) -> Result<M, StoreError> {
        self.store.replace_in(self.binding, identifier, instance).await
    }

    pub async fn delete(&self, identifier: &str) -> Result<(), StoreError> {
        self.store.delete_in(self.binding, identifier).await
    }

    pub async fn bulk(
        &self,
        actions: Vec<BulkAction<M>>,
        batch_size: usize,
    ) -> Result<Vec<BulkBatchReport>, StoreError> {
        self.store.bulk_in(self.binding, actions, batch_size).await
    }

    pub async fn count(&self, params: &SearchParams) -> Result<u64, StoreError> {
        self.binding.search.count(params).await
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchHit<P>>, StoreError> {
        self.binding.search.search(params).await
    }

    pub async fn search_with_count(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<SearchHit<P>>, u64), StoreError> {
        self.binding.search.search_with_count(params).await
    }

    /// Run `body`, and on success force recent writes to the routed index to
    /// become visible. If `body` fails, no flush is attempted.
    pub async fn flushing<F, Fut, T>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let out = body().await?;
        self.flush().await?;
        Ok(out)
    }

    /// Force recent writes to the routed index to become visible.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.store.backend.refresh(self.binding.index.name()).await
    }
}
