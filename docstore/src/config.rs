//! Client configuration.
//!
//! Configuration inputs for backend-client construction: endpoint, basic
//! credentials, and a global request timeout. Cloud request-signing is a
//! deployment concern handled outside this crate.

use std::env;
use std::time::Duration;

use opensearch::auth::Credentials;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::OpenSearch;
use tracing::info;
use url::Url;

use crate::errors::StoreError;

/// Default backend URL.
const DEFAULT_URL: &str = "http://localhost:9200";

/// Configuration for the backend client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The backend endpoint, e.g. "http://localhost:9200".
    pub url: String,
    /// Optional basic-auth username.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<String>,
    /// Optional global request timeout.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Recognizes `DOCSTORE_URL`, `DOCSTORE_USERNAME`, and `DOCSTORE_PASSWORD`;
    /// unset variables fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            url: env::var("DOCSTORE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()),
            username: env::var("DOCSTORE_USERNAME").ok(),
            password: env::var("DOCSTORE_PASSWORD").ok(),
            timeout: None,
        }
    }
}

/// Build an OpenSearch client from configuration.
pub fn build_client(config: &ClientConfig) -> Result<OpenSearch, StoreError> {
    let url = Url::parse(&config.url)
        .map_err(|e| StoreError::backend(format!("invalid backend URL {}: {}", config.url, e)))?;

    let conn_pool = SingleNodeConnectionPool::new(url);
    let mut builder = TransportBuilder::new(conn_pool).disable_proxy();

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        builder = builder.auth(Credentials::Basic(username.clone(), password.clone()));
    }
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    let transport = builder
        .build()
        .map_err(|e| StoreError::backend(format!("failed to build transport: {}", e)))?;

    info!(url = %config.url, "created backend client");
    Ok(OpenSearch::new(transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "http://localhost:9200");
        assert!(config.username.is_none());
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_build_client_rejects_bad_url() {
        let config = ClientConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(build_client(&config), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_build_client_with_credentials() {
        let config = ClientConfig {
            username: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert!(build_client(&config).is_ok());
    }
}
