use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use crate::{
    error::ProviderError,
    model::{RawPayload, WeatherRequest},
};

use super::WeatherProvider;

/// Serves a payload saved on disk, whatever zip code is asked for.
#[derive(Debug, Clone)]
pub struct FilePayloadProvider {
    path: PathBuf,
}

impl FilePayloadProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WeatherProvider for FilePayloadProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_payload(&self, request: &WeatherRequest) -> Result<RawPayload, ProviderError> {
        tracing::debug!(
            path = %self.path.display(),
            zip = %request.zip_code,
            "reading payload file"
        );
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read payload file: {}", self.path.display()))
            .map_err(|e| ProviderError::unavailable(self.name(), format!("{e:#}")))?;
        Ok(RawPayload::detect(&contents))
    }
}
