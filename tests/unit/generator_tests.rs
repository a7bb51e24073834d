/*!
 * Tests for the candidate generator against scripted backends
 */

use std::sync::Arc;
use std::time::Duration;

use tmqe::errors::GenerationError;
use tmqe::generation::{CandidateGenerator, GenerationRequest, PromptStore};
use tmqe::terms::TermEntry;

use crate::common;
use crate::common::mock_backends::ScriptedBackend;

fn request(source: &str, n: usize) -> GenerationRequest {
    GenerationRequest {
        source_text: source.to_string(),
        source_lang: "en".to_string(),
        target_lang: "fr".to_string(),
        n,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_generate_repairRequest_shouldPromptWithSeed() {
    let backend = Arc::new(ScriptedBackend::replying("Bonjour le monde encore"));
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let mut req = request("Hello world again", 1);
    req.fuzzy_seed = Some("Bonjour le monde".to_string());
    req.similarity = Some(0.8);
    req.terms = vec![TermEntry::new("world", "monde", true)];

    let candidates = generator.generate(&req).await.unwrap();

    assert_eq!(candidates, vec!["Bonjour le monde encore".to_string()]);
    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Existing translation:\nBonjour le monde"));
    assert!(prompts[0].contains("Hello world again"));
    assert!(prompts[0].contains("monde"));
    assert!(prompts[0].contains("Required terminology"));
}

#[tokio::test]
async fn test_generate_severalCandidates_shouldStepSamplingPerCandidate() {
    let backend = Arc::new(ScriptedBackend::replying("fallback"));
    backend.push(Ok("Translation: Un"));
    backend.push(Ok("\"Deux\""));
    backend.push(Ok("Trois"));
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let candidates = generator.generate(&request("One two three", 3)).await.unwrap();

    assert_eq!(candidates, vec!["Un", "Deux", "Trois"]);
    let params = backend.params();
    assert_eq!(params.len(), 3);
    assert_eq!(params[0].seed, Some(7));
    assert_eq!(params[2].seed, Some(9));
    assert!((params[1].temperature - 0.5).abs() < 1e-6);
    assert!(params.iter().all(|p| p.max_tokens == 128));
    assert_eq!(backend.loads(), 1);
}

#[tokio::test]
async fn test_generate_transientFailure_shouldRetryAttempt() {
    let backend = Arc::new(ScriptedBackend::replying("Bonjour"));
    backend.push(Err(GenerationError::Network("connection reset".to_string())));
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let candidates = generator.generate(&request("Hello", 1)).await.unwrap();

    assert_eq!(candidates, vec!["Bonjour"]);
    assert_eq!(backend.decode_calls(), 2);
}

#[tokio::test]
async fn test_generate_laterCandidateFails_shouldKeepEarlierOnes() {
    let backend = Arc::new(ScriptedBackend::replying("never reached"));
    backend.push(Ok("Premier"));
    backend.push(Err(GenerationError::Network("down".to_string())));
    backend.push(Err(GenerationError::Network("still down".to_string())));
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let candidates = generator.generate(&request("First", 3)).await.unwrap();

    assert_eq!(candidates, vec!["Premier"]);
    assert_eq!(backend.decode_calls(), 3);
}

#[tokio::test]
async fn test_generate_slowBackend_shouldTimeOut() {
    let backend = Arc::new(ScriptedBackend::replying("late").with_delay(Duration::from_millis(300)));
    let mut settings = common::generator_settings(1);
    settings.attempt_timeout = Duration::from_millis(20);
    let generator = CandidateGenerator::new(
        backend.clone(),
        common::static_resources(24.0),
        PromptStore::default(),
        settings,
    );

    let error = generator.generate(&request("Hello", 1)).await.unwrap_err();

    assert!(matches!(error, GenerationError::Timeout(_)));
    assert_eq!(backend.decode_calls(), 2);
}

#[tokio::test]
async fn test_generate_permanentFailure_shouldNotRetry() {
    let backend = Arc::new(ScriptedBackend::failing());
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let error = generator.generate(&request("Hello", 2)).await.unwrap_err();

    assert!(matches!(error, GenerationError::Backend { status: Some(400), .. }));
    assert_eq!(backend.decode_calls(), 1);
}

#[tokio::test]
async fn test_generate_emptySource_shouldBeInvalidRequest() {
    let backend = Arc::new(ScriptedBackend::replying("x"));
    let generator = common::build_generator(backend.clone(), common::static_resources(24.0));

    let error = generator.generate(&request("  ", 1)).await.unwrap_err();

    assert!(matches!(error, GenerationError::InvalidRequest(_)));
    assert_eq!(backend.loads(), 0);
}

#[tokio::test]
async fn test_unload_afterGenerate_shouldReleaseBackendAndMemory() {
    let backend = Arc::new(ScriptedBackend::replying("Bonjour"));
    let resources = common::static_resources(24.0);
    let generator = common::build_generator(backend.clone(), resources.clone());

    generator.generate(&request("Hello", 1)).await.unwrap();
    assert!(generator.is_loaded());
    assert!((resources.registered_gb() - 4.0).abs() < 1e-9);

    assert!(generator.unload().await.unwrap());
    assert!(!generator.is_loaded());
    assert_eq!(backend.releases(), 1);
    assert!(resources.registered_gb().abs() < 1e-9);
    assert!(!generator.unload().await.unwrap());
}
