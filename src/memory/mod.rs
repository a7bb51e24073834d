/*!
 * Translation-memory lookup.
 *
 * - `similarity`: normalized string-similarity ratios
 * - `index`: the in-memory index plus JSON and TMX loaders
 * - `matcher`: exact / fuzzy / none classification and the dispatch predicates
 */

pub mod index;
pub mod matcher;
pub mod similarity;

pub use index::{MemoryEntry, TmIndex, classify_human};
pub use matcher::{MatchResult, MatchType, TmMatcher};
pub use similarity::SimilarityMetric;
