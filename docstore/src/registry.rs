//! Index naming, registration, and creation.
//!
//! The registry owns the set of named/versioned indices known to the
//! application. Registration is local; `createall` materializes the indices
//! in the backend.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::info;

use crate::backend::SearchBackend;
use crate::errors::StoreError;
use crate::mapping::{base_mapping, merge_mapping};

struct IndexInner {
    name: String,
    alias: Option<String>,
    mapping: Mutex<Value>,
}

/// A handle to a named, optionally aliased index.
///
/// Handles are cheap to clone and share; search indexes extend the mapping
/// through a shared handle before the index is created in the backend.
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl Index {
    /// Create a handle with the base mapping for the given discriminator
    /// field.
    pub fn new(name: impl Into<String>, alias: Option<String>, doctype_field: &str) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                name: name.into(),
                alias,
                mapping: Mutex::new(base_mapping(doctype_field)),
            }),
        }
    }

    /// The canonical index name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The unversioned alias, if the index was registered with a version.
    pub fn alias(&self) -> Option<&str> {
        self.inner.alias.as_deref()
    }

    /// Merge a mapping fragment into this index's mapping.
    pub fn merge_mapping(&self, fragment: &Value) {
        let mut mapping = self.inner.mapping.lock().expect("mapping lock poisoned");
        merge_mapping(&mut mapping, fragment);
    }

    /// Snapshot of the merged mapping.
    pub fn mapping(&self) -> Value {
        self.inner.mapping.lock().expect("mapping lock poisoned").clone()
    }

    /// The request body used to create this index in the backend.
    pub fn creation_body(&self) -> Value {
        let mut body = json!({ "mappings": self.mapping() });
        if let Some(alias) = self.alias() {
            body["aliases"] = json!({ alias: {} });
        }
        body
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.inner.name)
            .field("alias", &self.inner.alias)
            .finish()
    }
}

/// Options for [`IndexRegistry::createall`].
#[derive(Debug, Clone, Default)]
pub struct CreateAllOptions {
    /// Delete and recreate indices that already exist.
    pub force: bool,
    /// If non-empty, only create indices whose name or alias is listed.
    pub only: Vec<String>,
    /// Skip indices whose name or alias is listed.
    pub skip: Vec<String>,
}

/// A registry of application indices.
///
/// Canonical names follow the convention
/// `underscore_join([name_or_app_name, version?, "test"?])`; the testing
/// suffix keeps unit tests from clobbering real data and is an explicit flag,
/// not ambient state.
pub struct IndexRegistry {
    backend: Arc<dyn SearchBackend>,
    app_name: String,
    testing: bool,
    doctype_field: String,
    indexes: Vec<Index>,
}

impl IndexRegistry {
    pub fn new(backend: Arc<dyn SearchBackend>, app_name: impl Into<String>) -> Self {
        Self {
            backend,
            app_name: app_name.into(),
            testing: false,
            doctype_field: "doctype".to_string(),
            indexes: Vec::new(),
        }
    }

    /// Enable the testing naming suffix.
    pub fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    /// Override the discriminator field used in base mappings.
    pub fn with_doctype_field(mut self, field: impl Into<String>) -> Self {
        self.doctype_field = field.into();
        self
    }

    /// Generate a convention-aware index name. Deterministic and
    /// side-effect-free.
    pub fn name_for(
        app_name: &str,
        name: Option<&str>,
        version: Option<&str>,
        testing: bool,
    ) -> String {
        let mut parts = vec![name.unwrap_or(app_name).to_string()];
        if let Some(version) = version {
            parts.push(version.to_string());
        }
        if testing {
            parts.push("test".to_string());
        }
        parts
            .iter()
            .map(|part| underscore(part))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Register an index locally.
    ///
    /// Fails with [`StoreError::Conflict`] if the canonical name is already
    /// registered. When a version is supplied, the unversioned canonical name
    /// becomes an alias to the versioned index. `createall` is still needed
    /// to save the index to the backend.
    pub fn register(
        &mut self,
        name: Option<&str>,
        version: Option<&str>,
    ) -> Result<Index, StoreError> {
        let (index_name, alias) = match version {
            None => (
                Self::name_for(&self.app_name, name, None, self.testing),
                None,
            ),
            Some(version) => (
                Self::name_for(&self.app_name, name, Some(version), self.testing),
                Some(Self::name_for(&self.app_name, name, None, self.testing)),
            ),
        };

        if self.indexes.iter().any(|index| index.name() == index_name) {
            return Err(StoreError::conflict(format!(
                "index already registered for name: {}",
                index_name
            )));
        }

        let index = Index::new(index_name, alias, &self.doctype_field);
        self.indexes.push(index.clone());
        Ok(index)
    }

    /// The registered indices, in registration order.
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Look up a registered index by canonical name.
    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.name() == name)
    }

    /// Create all registered indices in the backend.
    ///
    /// Indices are processed in registration order; a failure partway through
    /// leaves earlier indices created and later ones untouched. Indices that
    /// already exist are left alone unless `force` is set.
    pub async fn createall(&self, options: &CreateAllOptions) -> Result<(), StoreError> {
        for index in &self.indexes {
            if !options.only.is_empty() && !name_matches(index, &options.only) {
                continue;
            }
            if name_matches(index, &options.skip) {
                continue;
            }

            if options.force && self.backend.index_exists(index.name()).await? {
                self.backend.delete_index(index.name()).await?;
            }

            match self.backend.create_index(index.name(), index.creation_body()).await {
                Ok(()) => {
                    info!(index = index.name(), "index created");
                    self.backend.refresh(index.name()).await?;
                }
                // Another writer got there first; the index exists, which is
                // what we wanted.
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Whether an index's name or alias appears in a selection list.
fn name_matches(index: &Index, names: &[String]) -> bool {
    names.iter().any(|candidate| {
        candidate == index.name() || index.alias().is_some_and(|alias| alias == candidate)
    })
}

/// Word-boundary-aware snake-casing: `MyService` becomes `my_service`,
/// `HTTPServer` becomes `http_server`, hyphens and spaces become underscores.
pub fn underscore(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() {
            let boundary = match chars.get(i.wrapping_sub(1)) {
                Some(prev) if i > 0 => {
                    prev.is_lowercase()
                        || prev.is_ascii_digit()
                        || (prev.is_uppercase()
                            && chars.get(i + 1).is_some_and(|next| next.is_lowercase()))
                }
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryBackend;

    fn registry() -> IndexRegistry {
        IndexRegistry::new(Arc::new(InMemoryBackend::new()), "example").with_testing(true)
    }

    #[test]
    fn test_underscore() {
        assert_eq!(underscore("example"), "example");
        assert_eq!(underscore("MyService"), "my_service");
        assert_eq!(underscore("HTTPServer"), "http_server");
        assert_eq!(underscore("my-service"), "my_service");
        assert_eq!(underscore("v1"), "v1");
    }

    #[test]
    fn test_name_for() {
        assert_eq!(
            IndexRegistry::name_for("example", None, None, false),
            "example"
        );
        assert_eq!(
            IndexRegistry::name_for("example", None, Some("v1"), false),
            "example_v1"
        );
        assert_eq!(
            IndexRegistry::name_for("example", None, Some("v1"), true),
            "example_v1_test"
        );
        assert_eq!(
            IndexRegistry::name_for("example", Some("People"), None, true),
            "people_test"
        );
    }

    #[test]
    fn test_register_with_version_attaches_alias() {
        let mut registry = registry();
        let index = registry.register(None, Some("v1")).unwrap();

        assert_eq!(index.name(), "example_v1_test");
        assert_eq!(index.alias(), Some("example_test"));

        let body = index.creation_body();
        assert!(body["aliases"]["example_test"].is_object());
        assert_eq!(body["mappings"]["properties"]["doctype"]["type"], "keyword");
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = registry();
        registry.register(None, Some("v1")).unwrap();
        let err = registry.register(None, Some("v1")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_createall() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut registry =
            IndexRegistry::new(backend.clone(), "example").with_testing(true);
        registry.register(Some("people"), None).unwrap();
        registry.register(Some("places"), None).unwrap();

        registry.createall(&CreateAllOptions::default()).await.unwrap();

        assert!(backend.index_exists("people_test").await.unwrap());
        assert!(backend.index_exists("places_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_createall_only_and_skip() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut registry =
            IndexRegistry::new(backend.clone(), "example").with_testing(true);
        registry.register(Some("people"), None).unwrap();
        registry.register(Some("places"), None).unwrap();
        registry.register(Some("things"), None).unwrap();

        let options = CreateAllOptions {
            only: vec!["people_test".to_string(), "things_test".to_string()],
            skip: vec!["things_test".to_string()],
            ..Default::default()
        };
        registry.createall(&options).await.unwrap();

        assert!(backend.index_exists("people_test").await.unwrap());
        assert!(!backend.index_exists("places_test").await.unwrap());
        assert!(!backend.index_exists("things_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_createall_tolerates_existing_index() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut registry =
            IndexRegistry::new(backend.clone(), "example").with_testing(true);
        registry.register(Some("people"), None).unwrap();

        registry.createall(&CreateAllOptions::default()).await.unwrap();
        // Second run without force finds the index in place and moves on.
        registry.createall(&CreateAllOptions::default()).await.unwrap();

        let options = CreateAllOptions {
            force: true,
            ..Default::default()
        };
        registry.createall(&options).await.unwrap();
        assert!(backend.index_exists("people_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_createall_matches_alias() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut registry =
            IndexRegistry::new(backend.clone(), "example").with_testing(true);
        registry.register(Some("people"), Some("v1")).unwrap();

        let options = CreateAllOptions {
            only: vec!["people_test".to_string()],
            ..Default::default()
        };
        registry.createall(&options).await.unwrap();
        assert!(backend.index_exists("people_v1_test").await.unwrap());
    }
}
