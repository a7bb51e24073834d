use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::errors::RegistryError;

/// Downloads a model repository into a local directory
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `repo_id` into `dest` and return the artifact root
    async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<PathBuf, RegistryError>;
}

/// Repository listing returned by the hub
#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
struct RepoFile {
    rfilename: String,
}

/// Fetcher for a Hugging-Face-style hub
///
/// Lists the repository through `/api/models/{repo}` and downloads every file
/// from `/{repo}/resolve/{revision}/{file}`.
pub struct HubFetcher {
    client: Client,
    endpoint: Url,
    revision: String,
    token: Option<String>,
}

impl HubFetcher {
    pub fn new(endpoint: &str) -> Result<Self, RegistryError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RegistryError::Configuration(format!("Invalid hub endpoint {}: {}", endpoint, e)))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            endpoint,
            revision: "main".to_string(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    fn join(&self, path: &str) -> Result<Url, RegistryError> {
        self.endpoint
            .join(path)
            .map_err(|e| RegistryError::Configuration(format!("Invalid hub path {}: {}", path, e)))
    }

    fn fetch_error(repo_id: &str, reason: impl Into<String>) -> RegistryError {
        RegistryError::Fetch {
            model_id: repo_id.to_string(),
            reason: reason.into(),
        }
    }

    async fn get(&self, url: Url, repo_id: &str) -> Result<reqwest::Response, RegistryError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Self::fetch_error(repo_id, format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 429 {
            return Err(RegistryError::Configuration(format!(
                "Hub rejected {} with status {}",
                url, status
            )));
        }
        if !status.is_success() {
            return Err(Self::fetch_error(repo_id, format!("{} returned {}", url, status)));
        }
        Ok(response)
    }

    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>, RegistryError> {
        let url = self.join(&format!("api/models/{}", repo_id))?;
        let info: RepoInfo = self
            .get(url, repo_id)
            .await?
            .json()
            .await
            .map_err(|e| Self::fetch_error(repo_id, format!("invalid repository listing: {}", e)))?;
        Ok(info.siblings.into_iter().map(|f| f.rfilename).collect())
    }
}

#[async_trait]
impl ArtifactFetcher for HubFetcher {
    async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<PathBuf, RegistryError> {
        let files = self.list_files(repo_id).await?;
        info!("Fetching {} files of {} into {}", files.len(), repo_id, dest.display());
        tokio::fs::create_dir_all(dest).await?;

        for file in &files {
            // Reject names that would escape the destination directory
            if file.split('/').any(|part| part == ".." || part.is_empty()) {
                return Err(Self::fetch_error(repo_id, format!("unsafe file name in listing: {}", file)));
            }

            let url = self.join(&format!("{}/resolve/{}/{}", repo_id, self.revision, file))?;
            let body: Bytes = self
                .get(url, repo_id)
                .await?
                .bytes()
                .await
                .map_err(|e| Self::fetch_error(repo_id, format!("download of {} failed: {}", file, e)))?;

            let target = dest.join(file);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &body).await?;
            debug!("Wrote {} ({} bytes)", target.display(), body.len());
        }

        Ok(dest.to_path_buf())
    }
}
