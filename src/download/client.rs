//! Shared reqwest client: text GETs for catalog pages, streamed GETs for files.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client for catalog pages, chapter archives and page images.
///
/// Build one per run and clone it into every task; clones share the
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Client with a 30 s connect timeout and a 5 min overall timeout.
    ///
    /// # Panics
    ///
    /// Panics if reqwest cannot initialise its TLS backend.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// # Panics
    ///
    /// Panics if reqwest cannot initialise its TLS backend.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("reqwest client configuration is static");
        Self { client }
    }

    /// Fetches `url` and returns the response body as text.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the URL is invalid, the request fails or
    /// times out, or the server answers with a non-success status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send_get(url, None).await?;
        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;
        debug!(bytes = body.len(), "page loaded");
        Ok(body)
    }

    /// Streams `url` into the file at `dest`, returning the number of bytes written.
    ///
    /// Missing parent directories are created. `timeout` bounds the whole
    /// request including the body; `None` keeps the client's read timeout.
    /// A partially written file is removed when the transfer fails.
    ///
    /// # Errors
    ///
    /// Any [`DownloadError`]; `Io` when the destination cannot be written.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> Result<u64, DownloadError> {
        debug!("starting download");
        let response = self.send_get(url, timeout).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let stream_result = stream_to_file(&mut file, response, url, dest).await;
        if stream_result.is_err() {
            debug!(path = %dest.display(), "cleaning up partial file after error");
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
        }
        let bytes = stream_result?;

        info!(path = %dest.display(), bytes, "download complete");
        Ok(bytes)
    }

    async fn send_get(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }
}

/// Copies the response body into `file`, returning the byte count.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::from_reqwest(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        written += chunk.len() as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_http_client_download_to_path_writes_body() {
        let mock_server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/naruto-1.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip bytes here"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let dest = temp_dir.path().join("Naruto").join("Naruto 1.zip");
        let url = format!("{}/naruto-1.zip", mock_server.uri());

        let bytes = client.download_to_path(&url, &dest, None).await.unwrap();

        assert_eq!(bytes, 14);
        assert_eq!(std::fs::read(&dest).unwrap(), b"zip bytes here");
    }

    #[tokio::test]
    async fn test_http_client_download_503_is_http_status() {
        let mock_server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let dest = temp_dir.path().join("a.zip");
        let result = client
            .download_to_path(&format!("{}/a.zip", mock_server.uri()), &dest, None)
            .await;

        assert!(
            matches!(result, Err(DownloadError::HttpStatus { status: 503, .. })),
            "got {result:?}"
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_client_download_timeout_maps_to_timeout() {
        let mock_server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let dest = temp_dir.path().join("slow.zip");
        let result = client
            .download_to_path(
                &format!("{}/slow.zip", mock_server.uri()),
                &dest,
                Some(Duration::from_millis(200)),
            )
            .await;

        assert!(
            matches!(result, Err(DownloadError::Timeout { .. })),
            "got {result:?}"
        );
        assert!(!dest.exists(), "partial file must not be left behind");
    }

    #[tokio::test]
    async fn test_http_client_invalid_url() {
        let client = HttpClient::new();
        let result = client.get_text("not a url").await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_http_client_get_text_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga/N/Naruto"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::default();
        let body = client
            .get_text(&format!("{}/manga/N/Naruto", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }
}
