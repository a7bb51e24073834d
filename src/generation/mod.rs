/*!
 * Candidate generation: backend trait, prompt templates and the generator.
 */

pub mod backend;
pub mod generator;
pub mod prompts;

pub use backend::{GenerationBackend, SamplingParams};
pub use generator::{CandidateGenerator, GenerationRequest, GeneratorSettings, LoadedGenerator};
pub use prompts::{PromptKind, PromptStore, PromptVars};
