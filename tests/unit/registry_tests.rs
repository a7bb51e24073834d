/*!
 * Tests for the model registry
 */

use std::sync::Arc;
use std::time::Duration;

use tmqe::app_config::CatalogEntry;
use tmqe::errors::{Classify, ErrorClass, RegistryError};
use tmqe::file_utils::FileManager;
use tmqe::resources::{ModelKind, ModelRegistry};

use crate::common;
use crate::common::mock_backends::{FetchBehavior, MockFetcher};

const MODEL_ID: &str = "Unbabel/wmt22-cometkiwi-da";

fn catalog() -> Vec<CatalogEntry> {
    vec![CatalogEntry {
        model_id: MODEL_ID.to_string(),
        kind: ModelKind::Quality,
        repo_id: MODEL_ID.to_string(),
        estimated_gb: Some(2.0),
    }]
}

fn registry(dir: &std::path::Path, fetcher: Arc<MockFetcher>, timeout: Duration) -> ModelRegistry {
    ModelRegistry::new(dir, catalog(), fetcher, timeout).unwrap()
}

#[tokio::test]
async fn test_download_shouldPersistDescriptorAndSkipSecondFetch() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Write(2048)));
    let registry = registry(dir.path(), fetcher.clone(), Duration::from_secs(5));

    let path = registry.download(MODEL_ID).await.unwrap();
    let again = registry.download(MODEL_ID).await.unwrap();

    assert_eq!(path, again);
    assert_eq!(fetcher.calls(), 1);
    assert!(registry.is_downloaded(MODEL_ID));

    let descriptor = registry.get_descriptor(MODEL_ID).unwrap();
    assert!(descriptor.downloaded);
    assert!(descriptor.size_gb.unwrap() > 0.0);
    assert!(descriptor.download_timestamp.is_some());

    // A fresh registry over the same cache sees the persisted record
    let reopened = ModelRegistry::new(dir.path(), catalog(), fetcher, Duration::from_secs(5)).unwrap();
    assert_eq!(reopened.get_local_path(MODEL_ID), Some(path));
}

#[tokio::test]
async fn test_download_unknownModel_shouldBeConfigurationError() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Write(16)));
    let registry = registry(dir.path(), fetcher.clone(), Duration::from_secs(5));

    let error = registry.download("nobody/nothing").await.unwrap_err();

    assert!(matches!(error, RegistryError::Configuration(_)));
    assert_eq!(error.class(), ErrorClass::Permanent);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_download_emptyArtifact_shouldRollBack() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Empty));
    let registry = registry(dir.path(), fetcher, Duration::from_secs(5));

    let error = registry.download(MODEL_ID).await.unwrap_err();

    assert!(matches!(error, RegistryError::Fetch { .. }));
    assert!(!dir.path().join(FileManager::sanitize_model_id(MODEL_ID)).exists());
    assert!(!registry.is_downloaded(MODEL_ID));
}

#[tokio::test]
async fn test_download_slowFetch_shouldTimeOutAndRollBack() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Hang));
    let registry = registry(dir.path(), fetcher, Duration::from_millis(50));

    let error = registry.download(MODEL_ID).await.unwrap_err();

    assert!(matches!(error, RegistryError::Timeout { .. }));
    assert_eq!(error.class(), ErrorClass::Transient);
    assert!(!dir.path().join(FileManager::sanitize_model_id(MODEL_ID)).exists());
}

#[tokio::test]
async fn test_isDownloaded_missingArtifact_shouldSelfHeal() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Write(64)));
    let registry = registry(dir.path(), fetcher, Duration::from_secs(5));

    let path = registry.download(MODEL_ID).await.unwrap();
    std::fs::remove_dir_all(&path).unwrap();

    assert!(!registry.is_downloaded(MODEL_ID));
    assert!(!registry.get_descriptor(MODEL_ID).unwrap().downloaded);
    assert_eq!(registry.get_local_path(MODEL_ID), None);
}

#[tokio::test]
async fn test_delete_shouldRemoveArtifactAndRecord() {
    let dir = common::create_temp_dir().unwrap();
    let fetcher = Arc::new(MockFetcher::new(FetchBehavior::Write(64)));
    let registry = registry(dir.path(), fetcher, Duration::from_secs(5));

    let path = registry.download(MODEL_ID).await.unwrap();

    assert!(registry.delete(MODEL_ID).unwrap());
    assert!(!path.exists());
    assert!(!registry.delete(MODEL_ID).unwrap());

    // The catalogue still lists the model as available
    let listed = registry.list();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].downloaded);
}
