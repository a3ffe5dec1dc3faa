//! # docstore
//!
//! A conventions layer for persisting and searching documents in an
//! OpenSearch/Elasticsearch backend. It provides a relational-store-shaped
//! CRUD interface (`Store`), polymorphic search with discriminator-based hit
//! resolution (`SearchIndex`), named/versioned index management
//! (`IndexRegistry`), and a small translated error taxonomy so application
//! code never handles backend-specific failures directly.

pub mod backend;
pub mod config;
pub mod errors;
pub mod mapping;
pub mod model;
pub mod registry;
pub mod searching;
pub mod status;
pub mod store;
pub mod testing;

#[cfg(test)]
pub(crate) mod fixtures;

pub use backend::{OpenSearchBackend, SearchBackend};
pub use config::{build_client, ClientConfig};
pub use errors::StoreError;
pub use model::{Meta, Model};
pub use registry::{CreateAllOptions, Index, IndexRegistry};
pub use searching::{SearchHit, SearchIndex, SearchParams};
pub use status::{index_status, IndexStatus};
pub use store::{
    BulkAction, BulkBatchReport, BulkItemReport, Clock, IdSource, Store, StoreView, SystemClock,
    UuidSource,
};
