/*!
 * # tmqe - Translation Memory + Quality Estimation
 *
 * A pipeline that translates JSON documents segment by segment, reusing a
 * translation memory where it can and generating new candidates with a local
 * LLM where it cannot. Every generated candidate is scored and given a
 * routing decision.
 *
 * ## Architecture
 *
 * - `resources`: device memory tracking, loaded-model registry, model cache
 * - `memory`: translation-memory index and exact/fuzzy matcher
 * - `terms`: termbase loading, per-segment extraction and validation
 * - `generation`: prompt templates and the candidate generator
 * - `quality`: accuracy/fluency/tone scoring and the decision rule
 * - `workflow`: document codec and the per-segment state machine
 * - `providers`: Ollama backends for generation and embeddings
 * - `audit`: SQLite record of runs and segment outcomes
 * - `app_controller`: facade wiring everything from a `Config`
 * - `recovery`, `errors`: retry policy and the error taxonomy
 */

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod app_controller;
pub mod audit;
pub mod errors;
pub mod file_utils;
pub mod generation;
pub mod language_utils;
pub mod markup;
pub mod memory;
pub mod providers;
pub mod quality;
pub mod recovery;
pub mod resources;
pub mod terms;
pub mod workflow;

pub use app_config::Config;
pub use app_controller::{Controller, DocumentJob};
pub use errors::{AppError, ErrorClass};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
