//! Search against one index.
//!
//! An index may hold many (polymorphic) document types. The search index
//! resolves raw hits back into typed model instances via a lookup table keyed
//! by the discriminator value, and can restrict a search to specific document
//! types.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::backend::SearchBackend;
use crate::errors::StoreError;
use crate::model::Model;
use crate::registry::Index;

/// Structured search criteria.
///
/// `offset`/`limit` window the result set server-side; no cap is imposed
/// here, so the backend's own result-window limit governs deep pagination.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Pagination start (defaults to the backend's 0).
    pub offset: Option<u64>,
    /// Page size (defaults to the backend's page size).
    pub limit: Option<u64>,
    /// Restrict to these discriminator values.
    pub doc_types: Vec<String>,
    /// Free-text criterion, interpreted by the index's filter hook.
    pub q: Option<String>,
    /// Ask the backend to explain scoring.
    pub explain: bool,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_types.push(doc_type.into());
        self
    }

    pub fn doc_types<I, S>(mut self, doc_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_types.extend(doc_types.into_iter().map(Into::into));
        self
    }

    pub fn q(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

/// A resolved search hit.
///
/// Hits whose discriminator matches a registered model type come back typed;
/// hits with an unregistered (or missing) discriminator fall back to the raw
/// hit structure rather than failing.
#[derive(Debug, Clone)]
pub enum SearchHit<P> {
    Model(P),
    Raw(Value),
}

impl<P> SearchHit<P> {
    /// The typed model, if this hit resolved to one.
    pub fn as_model(&self) -> Option<&P> {
        match self {
            SearchHit::Model(model) => Some(model),
            SearchHit::Raw(_) => None,
        }
    }

    /// Consume the hit, yielding the typed model if resolved.
    pub fn into_model(self) -> Option<P> {
        match self {
            SearchHit::Model(model) => Some(model),
            SearchHit::Raw(_) => None,
        }
    }
}

type HitFactory<P> = fn(Value) -> Result<P, StoreError>;

/// An additional query clause derived from search parameters, layered in by
/// applications to support their own filter criteria (e.g. free text).
type FilterHook = dyn Fn(&SearchParams) -> Option<Value> + Send + Sync;

fn hit_factory<M, P>(source: Value) -> Result<P, StoreError>
where
    M: Model + Into<P>,
{
    let model: M = serde_json::from_value(source)
        .map_err(|e| StoreError::backend(format!("malformed {} document: {}", M::doctype(), e)))?;
    Ok(model.into())
}

/// Encapsulates search against one index.
///
/// The type parameter `P` is the result type searches produce; for a
/// polymorphic index it is a compatible base type (commonly an enum over the
/// concrete models), and each registered model converts into it.
pub struct SearchIndex<P> {
    backend: Arc<dyn SearchBackend>,
    index: Index,
    doctype_field: &'static str,
    doc_types: HashMap<&'static str, HitFactory<P>>,
    filter_hook: Option<Arc<FilterHook>>,
}

impl<P> Clone for SearchIndex<P> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            index: self.index.clone(),
            doctype_field: self.doctype_field,
            doc_types: self.doc_types.clone(),
            filter_hook: self.filter_hook.clone(),
        }
    }
}

impl<P> SearchIndex<P> {
    /// Create a search index bound to `index`, pre-registering the model `M`.
    pub fn new<M>(backend: Arc<dyn SearchBackend>, index: Index) -> Self
    where
        M: Model + Into<P>,
    {
        let mut search_index = Self::unregistered(backend, index, M::doctype_field());
        search_index.register_doc_type::<M>();
        search_index
    }

    /// Create a search index with no registered document types.
    pub fn unregistered(
        backend: Arc<dyn SearchBackend>,
        index: Index,
        doctype_field: &'static str,
    ) -> Self {
        Self {
            backend,
            index,
            doctype_field,
            doc_types: HashMap::new(),
            filter_hook: None,
        }
    }

    /// Install a hook that derives an extra query clause from the search
    /// parameters. The clause is added to the query's `must` list.
    pub fn with_filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SearchParams) -> Option<Value> + Send + Sync + 'static,
    {
        self.filter_hook = Some(Arc::new(hook));
        self
    }

    /// Record the mapping from `M`'s discriminator value to its constructor,
    /// and merge `M`'s field schema into the index mapping. Idempotent per
    /// model; later registrations merge additively.
    pub fn register_doc_type<M>(&mut self)
    where
        M: Model + Into<P>,
    {
        self.doc_types.insert(M::doctype(), hit_factory::<M, P>);
        self.index.merge_mapping(&M::mapping());
    }

    /// The index this search index is bound to.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Build the request body: base query, reverse-chronological order,
    /// doc-type restriction, custom filter clause, pagination window.
    ///
    /// `created_at` is the only implicit ordering; ties have backend-defined
    /// order.
    fn build_query(&self, params: &SearchParams) -> Value {
        let mut must = vec![json!({ "match_all": {} })];
        if let Some(hook) = &self.filter_hook {
            if let Some(clause) = hook(params) {
                must.push(clause);
            }
        }

        let mut filter = Vec::new();
        if !params.doc_types.is_empty() {
            let mut terms = Map::new();
            terms.insert(self.doctype_field.to_string(), json!(params.doc_types));
            filter.push(json!({ "terms": terms }));
        }

        let mut sort_field = Map::new();
        sort_field.insert("created_at".to_string(), json!({ "order": "desc" }));

        let mut body = json!({
            "query": { "bool": { "must": must, "filter": filter } },
            "sort": [sort_field],
        });

        if let Some(offset) = params.offset {
            body["from"] = json!(offset);
        }
        if let Some(limit) = params.limit {
            body["size"] = json!(limit);
        }
        if params.explain {
            body["explain"] = json!(true);
        }
        body
    }

    /// A count-only body carries just the query clause.
    fn build_count_query(&self, params: &SearchParams) -> Value {
        let mut body = self.build_query(params);
        let query = body["query"].take();
        json!({ "query": query })
    }

    /// Count the documents matching some criteria.
    pub async fn count(&self, params: &SearchParams) -> Result<u64, StoreError> {
        self.backend
            .count(self.index.name(), self.build_count_query(params))
            .await
    }

    /// Return the documents matching some criteria, most recent first.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchHit<P>>, StoreError> {
        let (hits, _) = self.execute(params).await?;
        Ok(hits)
    }

    /// Like [`search`](Self::search), but also returns the total match count
    /// from the same query execution (a single round trip).
    pub async fn search_with_count(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<SearchHit<P>>, u64), StoreError> {
        self.execute(params).await
    }

    async fn execute(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<SearchHit<P>>, u64), StoreError> {
        let mut body = self.build_query(params);
        body["track_total_hits"] = json!(true);

        let response = self.backend.search(self.index.name(), body).await?;

        let total = response["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let raw_hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();

        let mut hits = Vec::with_capacity(raw_hits.len());
        for raw in raw_hits {
            hits.push(self.resolve(raw)?);
        }
        Ok((hits, total))
    }

    /// Resolve a raw hit into a typed instance via the doc-type table.
    fn resolve(&self, hit: Value) -> Result<SearchHit<P>, StoreError> {
        let Some(mut source) = hit.get("_source").cloned() else {
            return Ok(SearchHit::Raw(hit));
        };

        let doctype = source
            .get(self.doctype_field)
            .and_then(Value::as_str)
            .map(str::to_string);

        let factory = match doctype.as_deref().and_then(|d| self.doc_types.get(d)) {
            Some(factory) => *factory,
            // Unregistered discriminator: fall back to the raw hit.
            None => return Ok(SearchHit::Raw(hit)),
        };

        // Carry the persisted identifier from hit metadata into the instance.
        if let (Some(obj), Some(id)) = (
            source.as_object_mut(),
            hit.get("_id").and_then(Value::as_str),
        ) {
            obj.entry("id".to_string()).or_insert_with(|| json!(id));
        }

        factory(source).map(SearchHit::Model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{people_fixture, Person};
    use crate::testing::InMemoryBackend;

    #[tokio::test]
    async fn test_count() {
        let (store, search_index) = people_fixture().await;
        store
            .flushing(|| async {
                store.create(Person::new("Kevin", "Durant")).await?;
                store.create(Person::new("Steph", "Curry")).await?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(search_index.count(&SearchParams::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search() {
        let (store, search_index) = people_fixture().await;
        let kevin = store
            .flushing(|| async { store.create(Person::new("Kevin", "Durant")).await })
            .await
            .unwrap();

        let hits = search_index.search(&SearchParams::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        let person = hits[0].as_model().unwrap();
        assert_eq!(person.id(), kevin.id());
        assert_eq!(person.first, "Kevin");
        assert_eq!(person.last, "Durant");
    }

    #[tokio::test]
    async fn test_search_with_count_single_round_trip() {
        let (store, search_index) = people_fixture().await;
        store
            .flushing(|| async {
                store.create(Person::new("Kevin", "Durant")).await?;
                store.create(Person::new("Steph", "Curry")).await?;
                Ok(())
            })
            .await
            .unwrap();

        let params = SearchParams::new().limit(1);
        let (hits, total) = search_index.search_with_count(&params).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_unregistered_doctype_falls_back_to_raw() {
        let (store, search_index) = people_fixture().await;

        // Write a document whose discriminator no model is registered for.
        let backend = store.backend();
        backend
            .index_document(
                store.index().name(),
                "mystery",
                serde_json::json!({ "doctype": "mystery", "first": "X" }),
            )
            .await
            .unwrap();
        backend.refresh(store.index().name()).await.unwrap();

        let hits = search_index.search(&SearchParams::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].as_model().is_none());
        match &hits[0] {
            SearchHit::Raw(raw) => {
                assert_eq!(raw["_source"]["doctype"], "mystery");
            }
            SearchHit::Model(_) => panic!("expected raw fallback"),
        }
    }

    #[test]
    fn test_build_query_shape() {
        let backend: Arc<dyn crate::backend::SearchBackend> = Arc::new(InMemoryBackend::new());
        let index = crate::registry::Index::new("people_test", None, "doctype");
        let search_index: SearchIndex<Person> =
            SearchIndex::new::<Person>(backend, index);

        let params = SearchParams::new()
            .offset(5)
            .limit(10)
            .doc_type("person")
            .explain(true);
        let body = search_index.build_query(&params);

        assert_eq!(body["from"], 5);
        assert_eq!(body["size"], 10);
        assert_eq!(body["explain"], true);
        assert_eq!(body["sort"][0]["created_at"]["order"], "desc");
        assert_eq!(
            body["query"]["bool"]["filter"][0]["terms"]["doctype"][0],
            "person"
        );
    }

    #[test]
    fn test_count_query_drops_pagination() {
        let backend: Arc<dyn crate::backend::SearchBackend> = Arc::new(InMemoryBackend::new());
        let index = crate::registry::Index::new("people_test", None, "doctype");
        let search_index: SearchIndex<Person> =
            SearchIndex::new::<Person>(backend, index);

        let body = search_index.build_count_query(&SearchParams::new().offset(5).limit(10));
        assert!(body.get("from").is_none());
        assert!(body.get("size").is_none());
        assert!(body.get("sort").is_none());
        assert!(body["query"].is_object());
    }
}
