/*!
 * Backend implementations for the generation and scoring traits.
 *
 * - Ollama: local LLM server, serving both candidate generation and
 *   sentence embeddings
 */

pub mod ollama;

pub use ollama::{OllamaBackend, OllamaClient, OllamaEmbedder};
