/*!
 * Terminology: termbase loading, per-segment extraction and validation.
 */

pub mod store;
pub mod validation;

pub use store::{TermEntry, TermStore};
pub use validation::{EnforcementPolicy, TermValidation, TermValidator};
