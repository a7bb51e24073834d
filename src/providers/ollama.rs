use async_trait::async_trait;
use log::{debug, error};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use url::Url;

use crate::errors::{GenerationError, ScoringError};
use crate::generation::backend::{GenerationBackend, SamplingParams};
use crate::quality::backends::EmbeddingBackend;

/// How long a positive availability probe is trusted
const AVAILABILITY_TTL: Duration = Duration::from_secs(30);

/// How long Ollama keeps the model resident between requests
const KEEP_ALIVE: &str = "30m";

/// Ollama client shared by the generation and embedding backends
#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
    /// Per-request timeout, reported on timeouts
    timeout: Duration,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

/// Sampling options for the Ollama API
#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    /// Maximum number of tokens to generate
    num_predict: u32,
}

/// Generate response from the Ollama API
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Embedding request for the Ollama API
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Embedding response from the Ollama API
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Failure talking to Ollama, before it is mapped to a component error
#[derive(Debug)]
enum CallError {
    Timeout,
    Network(String),
    Status(StatusCode, String),
    Decode(String),
}

impl OllamaClient {
    /// Create a client for `endpoint` (e.g. `http://localhost:11434`)
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let url = Url::parse(endpoint)
            .map_err(|e| GenerationError::InvalidRequest(format!("invalid Ollama endpoint {}: {}", endpoint, e)))?;
        let base_url = url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            client: Client::builder()
                .timeout(timeout)
                // Ollama uses HTTP/1.1
                .http1_only()
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req: Serialize + ?Sized, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, CallError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout
            } else {
                CallError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Ollama API error ({}): {}", status, error_text);
            return Err(CallError::Status(status, error_text));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| CallError::Decode(format!("Failed to parse Ollama response from {}: {}", path, e)))
    }

    /// Get the Ollama API version
    pub async fn version(&self) -> Option<String> {
        let url = format!("{}/api/version", self.base_url);
        let response: serde_json::Value = self.client.get(&url).send().await.ok()?.json().await.ok()?;
        response["version"].as_str().map(str::to_string)
    }
}

impl From<CallError> for GenerationError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Timeout => GenerationError::Network("request timed out".to_string()),
            CallError::Network(message) => GenerationError::Network(message),
            CallError::Status(status, message) => GenerationError::Backend {
                status: Some(status.as_u16()),
                message,
            },
            CallError::Decode(message) => GenerationError::Backend { status: None, message },
        }
    }
}

impl From<CallError> for ScoringError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Timeout => ScoringError::Backend("request timed out".to_string()),
            CallError::Network(message) | CallError::Decode(message) => ScoringError::Backend(message),
            CallError::Status(status, message) => ScoringError::Backend(format!("{}: {}", status, message)),
        }
    }
}

/// Generation backend served by an Ollama model
pub struct OllamaBackend {
    client: OllamaClient,
    model: String,
    available: Mutex<Option<(Instant, bool)>>,
}

impl OllamaBackend {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            available: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        if let Some((checked_at, true)) = *self.available.lock() {
            if checked_at.elapsed() < AVAILABILITY_TTL {
                return true;
            }
        }

        let available = match self.client.version().await {
            Some(version) => {
                debug!("Ollama {} reachable at {}", version, self.client.base_url());
                true
            }
            None => false,
        };
        *self.available.lock() = Some((Instant::now(), available));
        available
    }

    async fn load(&self) -> Result<(), GenerationError> {
        // An empty prompt makes Ollama load the model and return
        let request = GenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            options: None,
            keep_alive: Some(KEEP_ALIVE),
        };
        self.client.post::<_, GenerateResponse>("/api/generate", &request).await?;
        Ok(())
    }

    async fn decode(&self, prompt: &str, params: SamplingParams) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: Some(GenerateOptions {
                temperature: params.temperature,
                seed: params.seed,
                num_predict: params.max_tokens,
            }),
            keep_alive: Some(KEEP_ALIVE),
        };
        match self.client.post::<_, GenerateResponse>("/api/generate", &request).await {
            Ok(response) => Ok(response.response),
            Err(CallError::Timeout) => Err(GenerationError::Timeout(self.client.timeout.as_secs())),
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self) -> Result<(), GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            options: None,
            keep_alive: Some("0"),
        };
        self.client.post::<_, GenerateResponse>("/api/generate", &request).await?;
        Ok(())
    }
}

/// Embedding backend served by an Ollama embedding model
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ScoringError> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response: EmbeddingResponse = self.client.post("/api/embeddings", &request).await?;
        if response.embedding.is_empty() {
            return Err(ScoringError::Backend(format!("{} returned an empty embedding", self.model)));
        }
        Ok(response.embedding)
    }
}
