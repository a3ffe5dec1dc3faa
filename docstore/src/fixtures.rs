//! Test fixtures.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::SearchBackend;
use crate::model::{Meta, Model};
use crate::registry::{CreateAllOptions, Index, IndexRegistry};
use crate::searching::{SearchIndex, SearchParams};
use crate::store::{Clock, Store};
use crate::testing::InMemoryBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(flatten)]
    pub meta: Meta,
    pub first: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
    pub last: String,
}

impl Person {
    pub fn new(first: &str, last: &str) -> Self {
        Self {
            meta: Meta::default(),
            first: first.to_string(),
            middle: None,
            last: last.to_string(),
        }
    }
}

impl Model for Person {
    fn doctype() -> &'static str {
        "person"
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn mapping() -> Value {
        json!({
            "properties": {
                "first": { "type": "text" },
                "middle": { "type": "text" },
                "last": { "type": "text" }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(flatten)]
    pub meta: Meta,
    pub first: String,
    pub last: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
}

impl Model for Employee {
    fn doctype() -> &'static str {
        "employee"
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn mapping() -> Value {
        json!({
            "properties": {
                "first": { "type": "text" },
                "last": { "type": "text" },
                "employee_id": { "type": "keyword" }
            }
        })
    }
}

/// Free-text criterion over name fields, layered onto the base query.
fn person_filter(params: &SearchParams) -> Option<Value> {
    params.q.as_ref().map(|q| {
        json!({
            "multi_match": { "query": q, "fields": ["first", "last"] }
        })
    })
}

pub fn person_search_index(
    backend: Arc<dyn SearchBackend>,
    index: Index,
) -> SearchIndex<Person> {
    SearchIndex::new::<Person>(backend, index).with_filter(person_filter)
}

/// A clock that ticks one second per call, so consecutive writes get
/// strictly increasing timestamps.
pub struct TickingClock {
    now: AtomicI64,
}

impl TickingClock {
    pub fn starting_at(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }
}

impl Clock for TickingClock {
    fn now_millis(&self) -> i64 {
        self.now.fetch_add(1000, Ordering::SeqCst)
    }
}

/// A person store and its search index over a fresh in-memory backend, with
/// the index already created and a deterministic clock installed.
pub async fn people_fixture() -> (Store<Person>, SearchIndex<Person>) {
    let backend: Arc<dyn SearchBackend> = Arc::new(InMemoryBackend::new());
    let mut registry = IndexRegistry::new(backend.clone(), "example").with_testing(true);
    let index = registry.register(Some("people"), Some("v1")).unwrap();

    let search_index = person_search_index(backend.clone(), index.clone());
    let store = Store::new(backend, index, search_index.clone())
        .with_clock(Arc::new(TickingClock::starting_at(1_500_000_000_000)));

    registry.createall(&CreateAllOptions::default()).await.unwrap();
    (store, search_index)
}
