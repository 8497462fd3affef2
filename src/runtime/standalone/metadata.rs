//! Sidecar metadata endpoint client.

use std::time::Duration;

use async_trait::async_trait;

use super::error::ProcessError;

/// Metadata key for the pid of the process that launched the sidecar.
pub const CLI_PID_KEY: &str = "cliPID";
/// Metadata key for the app's literal command line.
pub const APP_COMMAND_KEY: &str = "appCommand";

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Store `value` under `key` on the sidecar listening on `http_port`.
    async fn put(&self, http_port: u16, key: &str, value: &str) -> Result<(), ProcessError>;
}

/// `PUT http://127.0.0.1:<port>/v1.0/metadata/<key>` with the value as body.
#[derive(Debug, Clone)]
pub struct HttpMetadataClient {
    client: reqwest::Client,
}

impl HttpMetadataClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn url(http_port: u16, key: &str) -> String {
        format!("http://127.0.0.1:{http_port}/v1.0/metadata/{key}")
    }
}

impl Default for HttpMetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn put(&self, http_port: u16, key: &str, value: &str) -> Result<(), ProcessError> {
        let failed = |reason: String| ProcessError::Metadata {
            key: key.to_string(),
            reason,
        };

        let response = self
            .client
            .put(Self::url(http_port, key))
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        tracing::debug!("Set sidecar metadata {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_url() {
        assert_eq!(
            HttpMetadataClient::url(3500, CLI_PID_KEY),
            "http://127.0.0.1:3500/v1.0/metadata/cliPID"
        );
    }

    #[tokio::test]
    async fn test_put_against_closed_port_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = HttpMetadataClient::new()
            .put(port, APP_COMMAND_KEY, "python app.py")
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Metadata { ref key, .. } if key == "appCommand"));
    }
}
