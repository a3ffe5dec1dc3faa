//! OpenSearch implementation of the backend seam.
//!
//! Wraps the OpenSearch Rust client, checks response status codes, and
//! translates failures into the store error taxonomy.

use async_trait::async_trait;
use opensearch::http::request::JsonBody;
use opensearch::http::response::Response;
use opensearch::indices::{
    IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesGetParts,
    IndicesRefreshParts, IndicesStatsParts,
};
use opensearch::{
    BulkParts, CountParts, CreateParts, DeleteParts, GetParts, IndexParts, OpenSearch,
    SearchParts, UpdateParts,
};
use serde_json::Value;
use tracing::{debug, error};

use crate::backend::SearchBackend;
use crate::config::{build_client, ClientConfig};
use crate::errors::{translate_status, StoreError};

/// Backend implementation on the OpenSearch client.
///
/// The underlying transport is long-lived and shared read-only across every
/// store and search index derived from it; nothing mutates connection state
/// after construction.
pub struct OpenSearchBackend {
    client: OpenSearch,
}

impl OpenSearchBackend {
    /// Create a backend from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: build_client(config)?,
        })
    }

    /// Wrap an already-constructed client.
    pub fn from_client(client: OpenSearch) -> Self {
        Self { client }
    }

    /// Check a response status and translate failures.
    async fn check(response: Response, context: &str) -> Result<Response, StoreError> {
        let status = response.status_code();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, context = context, "request failed");
        Err(translate_status(status.as_u16(), context, &body))
    }

    async fn json(response: Response, context: &str) -> Result<Value, StoreError> {
        response
            .json()
            .await
            .map_err(|e| StoreError::backend(format!("{}: malformed response: {}", context, e)))
    }
}

#[async_trait]
impl SearchBackend for OpenSearchBackend {
    async fn create_document(
        &self,
        index: &str,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .create(CreateParts::IndexId(index, id))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("create {}/{}", index, id)).await?;
        debug!(index = index, id = id, "document created");
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Value, StoreError> {
        let response = self
            .client
            .get(GetParts::IndexId(index, id))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("get {}/{}", index, id);
        let response = Self::check(response, &context).await?;
        Self::json(response, &context).await
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        body: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("update {}/{}", index, id)).await?;
        debug!(index = index, id = id, "document updated");
        Ok(())
    }

    async fn index_document(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .index(IndexParts::IndexId(index, id))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("index {}/{}", index, id)).await?;
        debug!(index = index, id = id, "document indexed");
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(index, id))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("delete {}/{}", index, id)).await?;
        debug!(index = index, id = id, "document deleted");
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: Vec<Value>) -> Result<Value, StoreError> {
        let body: Vec<JsonBody<Value>> = actions.into_iter().map(Into::into).collect();
        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("bulk {}", index);
        let response = Self::check(response, &context).await?;
        Self::json(response, &context).await
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("search {}", index);
        let response = Self::check(response, &context).await?;
        Self::json(response, &context).await
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, StoreError> {
        let response = self
            .client
            .count(CountParts::Index(&[index]))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("count {}", index);
        let response = Self::check(response, &context).await?;
        let value = Self::json(response, &context).await?;
        Ok(value.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("refresh {}", index)).await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Ok(response.status_code().is_success())
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let status = response.status_code();
        if status.is_success() {
            debug!(index = index, "index created");
            return Ok(());
        }
        let error_body = response.text().await.unwrap_or_default();
        if error_body.contains("resource_already_exists_exception")
            || error_body.contains("index_already_exists_exception")
        {
            return Err(StoreError::conflict(format!("index {} already exists", index)));
        }
        error!(status = %status, index = index, "index creation failed");
        Err(translate_status(
            status.as_u16(),
            &format!("create index {}", index),
            &error_body,
        ))
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Self::check(response, &format!("delete index {}", index)).await?;
        Ok(())
    }

    async fn index_info(&self, index: &str) -> Result<Value, StoreError> {
        let response = self
            .client
            .indices()
            .get(IndicesGetParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("get index {}", index);
        let response = Self::check(response, &context).await?;
        Self::json(response, &context).await
    }

    async fn index_stats(&self, index: &str) -> Result<Value, StoreError> {
        let response = self
            .client
            .indices()
            .stats(IndicesStatsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let context = format!("stats {}", index);
        let response = Self::check(response, &context).await?;
        Self::json(response, &context).await
    }
}
