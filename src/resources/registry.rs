/*!
 * Model registry: resolves model ids to cached local artifacts.
 *
 * Descriptors are persisted to `models.json` in the cache directory, one
 * record per model id, rewritten atomically on every change. Only ids present
 * in the catalogue can be downloaded.
 */

use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::CatalogEntry;
use crate::errors::RegistryError;
use crate::file_utils::FileManager;
use crate::resources::fetcher::ArtifactFetcher;

const METADATA_FILE: &str = "models.json";
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Role a model plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Generation,
    Embedding,
    Quality,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelKind::Generation => "generation",
            ModelKind::Embedding => "embedding",
            ModelKind::Quality => "quality",
        };
        write!(f, "{}", name)
    }
}

/// Persisted state of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub kind: ModelKind,
    pub repo_id: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub size_gb: Option<f64>,
    /// RFC 3339 timestamp of the last successful download
    #[serde(default)]
    pub download_timestamp: Option<String>,
}

impl ModelDescriptor {
    fn from_catalog(entry: &CatalogEntry) -> Self {
        Self {
            model_id: entry.model_id.clone(),
            kind: entry.kind,
            repo_id: entry.repo_id.clone(),
            local_path: None,
            downloaded: false,
            size_gb: None,
            download_timestamp: None,
        }
    }

    fn clear_download(&mut self) {
        self.local_path = None;
        self.downloaded = false;
        self.size_gb = None;
        self.download_timestamp = None;
    }
}

/// Cache of model artifacts with a JSON metadata store
pub struct ModelRegistry {
    cache_dir: PathBuf,
    catalog: BTreeMap<String, CatalogEntry>,
    fetcher: Arc<dyn ArtifactFetcher>,
    download_timeout: Duration,
    records: Mutex<BTreeMap<String, ModelDescriptor>>,
}

impl ModelRegistry {
    /// Open the registry, reading any existing metadata store
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        catalog: Vec<CatalogEntry>,
        fetcher: Arc<dyn ArtifactFetcher>,
        download_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        let metadata_path = cache_dir.join(METADATA_FILE);
        let records: BTreeMap<String, ModelDescriptor> = FileManager::read_json_optional(&metadata_path)
            .map_err(|e| RegistryError::Metadata(format!("{:#}", e)))?
            .unwrap_or_default();

        let catalog = catalog
            .into_iter()
            .map(|entry| (entry.model_id.clone(), entry))
            .collect();

        Ok(Self {
            cache_dir,
            catalog,
            fetcher,
            download_timeout,
            records: Mutex::new(records),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join(METADATA_FILE)
    }

    fn persist(&self, records: &BTreeMap<String, ModelDescriptor>) -> Result<(), RegistryError> {
        FileManager::atomic_write_json(self.metadata_path(), records)
            .map_err(|e| RegistryError::Metadata(format!("{:#}", e)))
    }

    fn persist_lossy(&self, records: &BTreeMap<String, ModelDescriptor>) {
        if let Err(e) = self.persist(records) {
            warn!("Failed to persist model metadata: {}", e);
        }
    }

    /// Descriptor for a model id, created from the catalogue on first lookup
    pub fn get_descriptor(&self, model_id: &str) -> Option<ModelDescriptor> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(model_id) {
            return Some(existing.clone());
        }

        let entry = self.catalog.get(model_id)?;
        let descriptor = ModelDescriptor::from_catalog(entry);
        records.insert(model_id.to_string(), descriptor.clone());
        self.persist_lossy(&records);
        Some(descriptor)
    }

    /// Whether the artifact is downloaded and still on disk
    ///
    /// A record that claims a download whose path has vanished is reset.
    pub fn is_downloaded(&self, model_id: &str) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(model_id) else {
            return false;
        };
        if !record.downloaded {
            return false;
        }

        let present = record.local_path.as_ref().is_some_and(|p| p.exists());
        if !present {
            warn!(
                "Cached artifact for {} is missing; marking it as not downloaded",
                model_id
            );
            record.clear_download();
            self.persist_lossy(&records);
        }
        present
    }

    /// Local path of a downloaded artifact
    pub fn get_local_path(&self, model_id: &str) -> Option<PathBuf> {
        if !self.is_downloaded(model_id) {
            return None;
        }
        self.records
            .lock()
            .get(model_id)
            .and_then(|r| r.local_path.clone())
    }

    /// Download a catalogued model, returning the existing path when cached
    pub async fn download(&self, model_id: &str) -> Result<PathBuf, RegistryError> {
        let descriptor = self.get_descriptor(model_id).ok_or_else(|| {
            RegistryError::Configuration(format!("Model {} is not registered", model_id))
        })?;

        if let Some(path) = self.get_local_path(model_id) {
            info!("Model {} already cached at {}", model_id, path.display());
            return Ok(path);
        }

        let dest = self.cache_dir.join(FileManager::sanitize_model_id(model_id));
        info!("Downloading {} from {}", model_id, descriptor.repo_id);

        let fetched = tokio::time::timeout(
            self.download_timeout,
            self.fetcher.fetch(&descriptor.repo_id, &dest),
        )
        .await;

        let path = match fetched {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                self.rollback(&dest, None);
                return Err(match e {
                    RegistryError::Fetch { reason, .. } => RegistryError::Fetch {
                        model_id: model_id.to_string(),
                        reason,
                    },
                    other => other,
                });
            }
            Err(_) => {
                self.rollback(&dest, None);
                return Err(RegistryError::Timeout {
                    model_id: model_id.to_string(),
                    seconds: self.download_timeout.as_secs(),
                });
            }
        };

        let size_bytes = if path.exists() { FileManager::path_size(&path) } else { 0 };
        if size_bytes == 0 {
            self.rollback(&dest, Some(&path));
            return Err(RegistryError::Fetch {
                model_id: model_id.to_string(),
                reason: format!("fetch produced no artifact at {}", path.display()),
            });
        }

        let mut records = self.records.lock();
        let record = records
            .entry(model_id.to_string())
            .or_insert_with(|| descriptor.clone());
        record.local_path = Some(path.clone());
        record.downloaded = true;
        record.size_gb = Some(size_bytes as f64 / BYTES_PER_GB);
        record.download_timestamp = Some(Utc::now().to_rfc3339());

        if let Err(e) = self.persist(&records) {
            records.remove(model_id);
            drop(records);
            self.rollback(&dest, Some(&path));
            return Err(e);
        }

        info!(
            "Downloaded {} ({:.3} GB) to {}",
            model_id,
            size_bytes as f64 / BYTES_PER_GB,
            path.display()
        );
        Ok(path)
    }

    fn rollback(&self, dest: &Path, fetched: Option<&Path>) {
        for path in std::iter::once(dest).chain(fetched) {
            if let Err(e) = FileManager::remove_path(path) {
                error!("Rollback failed for {}: {:#}", path.display(), e);
            }
        }
    }

    /// Remove a model's artifact and metadata
    pub fn delete(&self, model_id: &str) -> Result<bool, RegistryError> {
        let mut records = self.records.lock();
        let Some(record) = records.remove(model_id) else {
            return Ok(false);
        };

        if let Some(path) = &record.local_path {
            FileManager::remove_path(path).map_err(|e| RegistryError::Metadata(format!("{:#}", e)))?;
        }
        self.persist(&records)?;
        info!("Deleted model {}", model_id);
        Ok(true)
    }

    /// Catalogue merged with persisted records, sorted by id
    pub fn list(&self) -> Vec<ModelDescriptor> {
        let records = self.records.lock();
        let mut merged: BTreeMap<String, ModelDescriptor> = self
            .catalog
            .values()
            .map(|entry| (entry.model_id.clone(), ModelDescriptor::from_catalog(entry)))
            .collect();
        for (id, record) in records.iter() {
            merged.insert(id.clone(), record.clone());
        }
        merged.into_values().collect()
    }

    /// Catalogue entry for a model id
    pub fn catalog_entry(&self, model_id: &str) -> Option<&CatalogEntry> {
        self.catalog.get(model_id)
    }
}
