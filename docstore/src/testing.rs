//! Test support.
//!
//! Backend inserts are not indexed synchronously for search and count
//! queries. While it is possible to explicitly flush an index, the backend's
//! persistence model assumes inserts are *not* visible immediately, so test
//! code is often better served by assertions that *eventually* resolve after
//! a bounded number of retries.
//!
//! This module also ships [`InMemoryBackend`], a deterministic in-process
//! [`SearchBackend`] that interprets the small query-DSL subset the crate
//! emits. It exists for unit tests; it is not a storage engine.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::backend::SearchBackend;
use crate::errors::StoreError;

/// Default number of attempts for [`eventually`].
pub const DEFAULT_TRIES: usize = 3;

/// Default delay between attempts for [`eventually`].
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Retry an async operation a bounded number of times with a fixed delay,
/// surfacing the last failure if every attempt is exhausted.
///
/// This is a test utility: it masks the backend's eventual-consistency
/// window rather than solving it, and must not be used as a production
/// consistency mechanism.
pub async fn eventually<T, E, F, Fut>(tries: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    assert!(tries > 0, "eventually requires at least one attempt");
    let mut last = None;
    for attempt in 0..tries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => last = Some(error),
        }
        if attempt + 1 < tries {
            tokio::time::sleep(delay).await;
        }
    }
    Err(last.expect("at least one attempt was made"))
}

#[derive(Default)]
struct IndexState {
    creation_body: Value,
    docs: BTreeMap<String, Value>,
}

#[derive(Default)]
struct State {
    indices: HashMap<String, IndexState>,
}

/// An in-process backend for unit tests.
///
/// Supports the request shapes the crate emits: strict create, get, partial
/// update, full index, delete, bulk action lines, and search/count bodies
/// built from `match_all`, `multi_match`, `match`, `term`/`terms` filters,
/// single-field sorts, and `from`/`size` windows. Documents become visible
/// immediately; `refresh` is a no-op.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("state lock poisoned");
        f(&mut state)
    }
}

/// Whether a document matches a query clause.
fn matches_clause(doc: &Value, clause: &Value) -> bool {
    let Some((kind, body)) = clause.as_object().and_then(|obj| obj.iter().next()) else {
        return true;
    };
    match kind.as_str() {
        "match_all" => true,
        "bool" => {
            let all = |key: &str| {
                body[key]
                    .as_array()
                    .map(|clauses| clauses.iter().all(|c| matches_clause(doc, c)))
                    .unwrap_or(true)
            };
            all("must") && all("filter")
        }
        "multi_match" => {
            let query = body["query"].as_str().unwrap_or("").to_lowercase();
            body["fields"]
                .as_array()
                .map(|fields| {
                    fields.iter().any(|field| {
                        let name = field.as_str().unwrap_or("");
                        let name = name.split('^').next().unwrap_or(name);
                        doc.get(name)
                            .and_then(Value::as_str)
                            .is_some_and(|v| v.to_lowercase().contains(&query))
                    })
                })
                .unwrap_or(false)
        }
        "match" => {
            let Some((field, criterion)) = body.as_object().and_then(|obj| obj.iter().next())
            else {
                return false;
            };
            let text = criterion
                .as_str()
                .or_else(|| criterion["query"].as_str())
                .unwrap_or("")
                .to_lowercase();
            doc.get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| v.to_lowercase().contains(&text))
        }
        "term" => {
            let Some((field, value)) = body.as_object().and_then(|obj| obj.iter().next()) else {
                return false;
            };
            doc.get(field) == Some(value)
        }
        "terms" => {
            let Some((field, values)) = body.as_object().and_then(|obj| obj.iter().next()) else {
                return false;
            };
            values
                .as_array()
                .is_some_and(|values| values.iter().any(|v| doc.get(field) == Some(v)))
        }
        _ => true,
    }
}

/// Select, order, and window the documents a search body matches. Returns
/// hits as `(id, doc)` pairs plus the pre-window total.
fn run_query<'a>(
    docs: &'a BTreeMap<String, Value>,
    body: &Value,
) -> (Vec<(&'a String, &'a Value)>, u64) {
    let mut matched: Vec<(&String, &Value)> = docs
        .iter()
        .filter(|(_, doc)| matches_clause(doc, &body["query"]))
        .collect();

    if let Some((field, spec)) = body["sort"][0]
        .as_object()
        .and_then(|obj| obj.iter().next())
    {
        let descending = spec["order"].as_str() != Some("asc");
        matched.sort_by_key(|(_, doc)| doc.get(field).and_then(Value::as_i64).unwrap_or(i64::MIN));
        if descending {
            matched.reverse();
        }
    }

    let total = matched.len() as u64;
    let from = body["from"].as_u64().unwrap_or(0) as usize;
    let size = body["size"].as_u64().map(|s| s as usize);

    let mut windowed: Vec<(&String, &Value)> =
        matched.into_iter().skip(from).collect();
    if let Some(size) = size {
        windowed.truncate(size);
    }
    (windowed, total)
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn create_document(
        &self,
        index: &str,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            let index_state = state.indices.entry(index.to_string()).or_default();
            if index_state.docs.contains_key(id) {
                return Err(StoreError::conflict(format!("document {} already exists", id)));
            }
            index_state.docs.insert(id.to_string(), body);
            Ok(())
        })
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Value, StoreError> {
        self.with_state(|state| {
            state
                .indices
                .get(index)
                .and_then(|index_state| index_state.docs.get(id))
                .map(|doc| {
                    json!({
                        "_index": index,
                        "_id": id,
                        "found": true,
                        "_source": doc,
                    })
                })
                .ok_or_else(|| StoreError::not_found(format!("document {}", id)))
        })
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            let doc = state
                .indices
                .get_mut(index)
                .and_then(|index_state| index_state.docs.get_mut(id))
                .ok_or_else(|| StoreError::not_found(format!("document {}", id)))?;

            if let (Some(target), Some(partial)) = (
                doc.as_object_mut(),
                body["doc"].as_object(),
            ) {
                for (key, value) in partial {
                    target.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        })
    }

    async fn index_document(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .indices
                .entry(index.to_string())
                .or_default()
                .docs
                .insert(id.to_string(), body);
            Ok(())
        })
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .indices
                .get_mut(index)
                .and_then(|index_state| index_state.docs.remove(id))
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found(format!("document {}", id)))
        })
    }

    async fn bulk(&self, index: &str, actions: Vec<Value>) -> Result<Value, StoreError> {
        self.with_state(|state| {
            let mut items = Vec::new();
            let mut errors = false;

            let mut i = 0;
            while i < actions.len() {
                let line = &actions[i];
                if let Some(meta) = line.get("index") {
                    let target = meta["_index"].as_str().unwrap_or(index).to_string();
                    let id = meta["_id"].as_str().unwrap_or_default().to_string();
                    let doc = actions.get(i + 1).cloned().unwrap_or(Value::Null);
                    state
                        .indices
                        .entry(target)
                        .or_default()
                        .docs
                        .insert(id.clone(), doc);
                    items.push(json!({
                        "index": { "_id": id, "status": 201, "result": "created" }
                    }));
                    i += 2;
                } else if let Some(meta) = line.get("delete") {
                    let target = meta["_index"].as_str().unwrap_or(index);
                    let id = meta["_id"].as_str().unwrap_or_default().to_string();
                    let removed = state
                        .indices
                        .get_mut(target)
                        .and_then(|index_state| index_state.docs.remove(&id));
                    if removed.is_some() {
                        items.push(json!({
                            "delete": { "_id": id, "status": 200, "result": "deleted" }
                        }));
                    } else {
                        errors = true;
                        items.push(json!({
                            "delete": { "_id": id, "status": 404, "result": "not_found" }
                        }));
                    }
                    i += 1;
                } else {
                    i += 1;
                }
            }

            Ok(json!({ "errors": errors, "items": items }))
        })
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError> {
        self.with_state(|state| {
            let empty = BTreeMap::new();
            let docs = state
                .indices
                .get(index)
                .map(|index_state| &index_state.docs)
                .unwrap_or(&empty);

            let (hits, total) = run_query(docs, &body);
            let raw_hits: Vec<Value> = hits
                .into_iter()
                .map(|(id, doc)| {
                    json!({
                        "_index": index,
                        "_id": id,
                        "_score": null,
                        "_source": doc,
                    })
                })
                .collect();

            Ok(json!({
                "hits": {
                    "total": { "value": total, "relation": "eq" },
                    "hits": raw_hits,
                }
            }))
        })
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, StoreError> {
        self.with_state(|state| {
            let count = state
                .indices
                .get(index)
                .map(|index_state| {
                    index_state
                        .docs
                        .values()
                        .filter(|doc| matches_clause(doc, &body["query"]))
                        .count() as u64
                })
                .unwrap_or(0);
            Ok(count)
        })
    }

    async fn refresh(&self, _index: &str) -> Result<(), StoreError> {
        // Writes are visible immediately.
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        self.with_state(|state| Ok(state.indices.contains_key(index)))
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<(), StoreError> {
        self.with_state(|state| {
            if state.indices.contains_key(index) {
                return Err(StoreError::conflict(format!("index {} already exists", index)));
            }
            state.indices.insert(
                index.to_string(),
                IndexState {
                    creation_body: body,
                    docs: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .indices
                .remove(index)
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found(format!("index {}", index)))
        })
    }

    async fn index_info(&self, index: &str) -> Result<Value, StoreError> {
        self.with_state(|state| {
            let index_state = state
                .indices
                .get(index)
                .ok_or_else(|| StoreError::not_found(format!("index {}", index)))?;

            let mut info = Map::new();
            info.insert(
                "aliases".to_string(),
                index_state.creation_body["aliases"].clone(),
            );
            info.insert(
                "mappings".to_string(),
                index_state.creation_body["mappings"].clone(),
            );
            Ok(json!({ index: info }))
        })
    }

    async fn index_stats(&self, index: &str) -> Result<Value, StoreError> {
        self.with_state(|state| {
            let index_state = state
                .indices
                .get(index)
                .ok_or_else(|| StoreError::not_found(format!("index {}", index)))?;
            let count = index_state.docs.len();
            Ok(json!({
                "indices": {
                    index: {
                        "total": { "docs": { "count": count } }
                    }
                }
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_eventually_succeeds_after_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, &str> = eventually(5, Duration::from_millis(1), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_eventually_surfaces_last_failure() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), usize> = eventually(3, Duration::from_millis(1), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(attempt) }
        })
        .await;

        assert_eq!(result.unwrap_err(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_strict_create_conflicts() {
        let backend = InMemoryBackend::new();
        backend
            .create_document("idx", "a", json!({ "x": 1 }))
            .await
            .unwrap();
        let err = backend
            .create_document("idx", "a", json!({ "x": 2 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_search_sort_and_window() {
        let backend = InMemoryBackend::new();
        for (id, created_at) in [("a", 100), ("b", 300), ("c", 200)] {
            backend
                .index_document("idx", id, json!({ "created_at": created_at }))
                .await
                .unwrap();
        }

        let body = json!({
            "query": { "match_all": {} },
            "sort": [{ "created_at": { "order": "desc" } }],
            "from": 1,
            "size": 1,
        });
        let response = backend.search("idx", body).await.unwrap();

        assert_eq!(response["hits"]["total"]["value"], 3);
        let hits = response["hits"]["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["_id"], "c");
    }

    #[tokio::test]
    async fn test_terms_filter() {
        let backend = InMemoryBackend::new();
        backend
            .index_document("idx", "a", json!({ "doctype": "circle" }))
            .await
            .unwrap();
        backend
            .index_document("idx", "b", json!({ "doctype": "square" }))
            .await
            .unwrap();

        let body = json!({
            "query": {
                "bool": {
                    "must": [{ "match_all": {} }],
                    "filter": [{ "terms": { "doctype": ["circle"] } }],
                }
            }
        });
        let response = backend.search("idx", body).await.unwrap();
        assert_eq!(response["hits"]["total"]["value"], 1);
        assert_eq!(response["hits"]["hits"][0]["_id"], "a");
    }
}
