//! Index status.
//!
//! A read-only view over every registered index: its name, raw
//! mapping/alias data, and raw statistics. This is the resource a status
//! endpoint serves; HTTP framing lives upstream.

use serde::Serialize;
use serde_json::Value;

use crate::backend::SearchBackend;
use crate::errors::StoreError;
use crate::registry::IndexRegistry;

/// Synthetic object containing information about an index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// The concrete index name.
    pub name: String,
    /// Alias names attached to the index.
    pub aliases: Vec<String>,
    /// Raw index metadata (mappings, settings).
    pub data: Value,
    /// Raw index statistics (document counts, indexing activity).
    pub stats: Value,
}

/// Gather status for every index registered with `registry`.
pub async fn index_status(
    backend: &dyn SearchBackend,
    registry: &IndexRegistry,
) -> Result<Vec<IndexStatus>, StoreError> {
    let mut statuses = Vec::new();

    for index in registry.indexes() {
        let info = backend.index_info(index.name()).await?;
        let stats = backend.index_stats(index.name()).await?;

        // The info response is keyed by concrete index name, which may
        // differ from the registered name when querying through an alias.
        let Some(entries) = info.as_object() else {
            continue;
        };
        for (name, data) in entries {
            let aliases = data["aliases"]
                .as_object()
                .map(|aliases| aliases.keys().cloned().collect())
                .unwrap_or_default();
            let index_stats = stats["indices"][name].clone();
            statuses.push(IndexStatus {
                name: name.clone(),
                aliases,
                data: data.clone(),
                stats: index_stats,
            });
        }
    }
    Ok(statuses)
}
