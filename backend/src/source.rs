//! Object storage access: probing and downloading uploaded files.

use async_trait::async_trait;

use crate::error::SourceError;

/// Read access to uploaded objects, addressed by pre-signed location.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Whether the object is reachable now.
    ///
    /// `Ok(false)` means "not yet"; transport failures are errors and are
    /// treated the same way by the orchestrator.
    async fn probe(&self, location: &str) -> Result<bool, SourceError>;

    /// Download the whole object.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SourceError>;
}

/// HTTP(S) object source for pre-signed URLs.
#[derive(Clone, Default)]
pub struct HttpObjectSource {
    client: reqwest::Client,
}

impl HttpObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing client (shared connection pool).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectSource for HttpObjectSource {
    async fn probe(&self, location: &str) -> Result<bool, SourceError> {
        let response = self.client.head(location).send().await?;
        let status = response.status();
        tracing::debug!(%status, "probe response");
        Ok(status.is_success())
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.client.get(location).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        tracing::debug!(bytes = body.len(), "object downloaded");
        Ok(body.to_vec())
    }
}
