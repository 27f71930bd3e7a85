//! HTTP client for a running panel server.
//!
//! Used by the CLI subcommands that talk to `bkpanel serve`.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::core::{BackupOption, CleanOutcome, ProgressView};
use crate::web::ErrorBody;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to reach the panel at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Panel returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct PanelClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl PanelClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn destinations(&self) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, "/api/destinations")).await
    }

    /// Start a backup. The response carries `progress_key` when queued.
    pub async fn create_backup(&self, option: BackupOption) -> Result<Value, ClientError> {
        let body = json!({ "option": option.as_str() });
        self.send_json(self.request(Method::POST, "/api/backups").json(&body))
            .await
    }

    pub async fn status(&self, progress_key: &str) -> Result<ProgressView, ClientError> {
        let request = self
            .request(Method::GET, "/api/status")
            .query(&[("progress_key", progress_key)]);
        self.send_json(request).await
    }

    pub async fn delete(&self, disk: &str, path: &str) -> Result<Value, ClientError> {
        let url = format!("/api/delete/{}/{}", disk, path.trim_start_matches('/'));
        self.send_json(self.request(Method::DELETE, &url)).await
    }

    pub async fn clean(&self) -> Result<CleanOutcome, ClientError> {
        self.send_json(self.request(Method::POST, "/api/clean")).await
    }

    pub async fn diagnostics(&self) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, "/api/diagnostics")).await
    }

    /// Stream an archive into `out` chunk by chunk. Returns bytes written.
    pub async fn download(&self, disk: &str, path: &str, out: &Path) -> Result<u64, ClientError> {
        let url = format!("/api/download/{}/{}", disk, path.trim_start_matches('/'));
        let mut response = self.send(self.request(Method::GET, &url)).await?;

        let mut file = tokio::fs::File::create(out).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await.map_err(|source| ClientError::Connect {
            url: self.base_url.clone(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(ClientError::Api { status, message })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(request).await?.json::<T>().await?)
    }
}
