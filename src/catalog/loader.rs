//! HTTP-backed [`PageLoader`].

use async_trait::async_trait;
use tracing::instrument;

use super::{CatalogError, CatalogPage, PageLoader};
use crate::download::HttpClient;

/// Loads catalog pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageLoader {
    client: HttpClient,
}

impl HttpPageLoader {
    /// Creates a loader sharing `client`'s connection pool.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<CatalogPage, CatalogError> {
        let html = self
            .client
            .get_text(url)
            .await
            .map_err(|source| CatalogError::load(url, source))?;
        Ok(CatalogPage::new(url, html))
    }
}
