use serde::{Deserialize, Serialize};

use crate::terms::store::TermEntry;

/// How missing terms affect a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementPolicy {
    /// Any missing approved term is a violation and zeroes compliance
    Strict,
    /// Each missing term costs a fixed penalty
    #[default]
    Soft,
}

impl std::fmt::Display for EnforcementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementPolicy::Strict => write!(f, "strict"),
            EnforcementPolicy::Soft => write!(f, "soft"),
        }
    }
}

/// Terminology check of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermValidation {
    /// Share of applicable terms whose target form is used, 0-100
    pub term_match_score: f64,
    /// Source forms of applicable terms missing from the candidate
    pub missing_terms: Vec<String>,
    /// Source forms of applicable terms found in the candidate
    pub used_terms: Vec<String>,
    /// Missing approved terms
    pub violations: Vec<String>,
    /// Policy-adjusted score, 0-100
    pub compliance_score: f64,
    pub policy: EnforcementPolicy,
}

impl TermValidation {
    /// No terms applied
    pub fn empty(policy: EnforcementPolicy) -> Self {
        Self {
            term_match_score: 100.0,
            missing_terms: Vec::new(),
            used_terms: Vec::new(),
            violations: Vec::new(),
            compliance_score: 100.0,
            policy,
        }
    }

    /// Whether the result must block automatic acceptance
    pub fn is_blocking(&self) -> bool {
        self.policy == EnforcementPolicy::Strict && !self.violations.is_empty()
    }
}

/// Checks candidates against the terms that apply to their source
#[derive(Debug, Clone)]
pub struct TermValidator {
    policy: EnforcementPolicy,
    soft_penalty: f64,
}

impl Default for TermValidator {
    fn default() -> Self {
        Self::new(EnforcementPolicy::default(), 10.0)
    }
}

impl TermValidator {
    pub fn new(policy: EnforcementPolicy, soft_penalty: f64) -> Self {
        Self {
            policy,
            soft_penalty: soft_penalty.max(0.0),
        }
    }

    pub fn policy(&self) -> EnforcementPolicy {
        self.policy
    }

    fn applies(entry: &TermEntry, source_lower: &str) -> bool {
        entry
            .source_forms()
            .any(|form| !form.is_empty() && source_lower.contains(&form.to_lowercase()))
    }

    /// Validate `candidate` against every entry applicable to `source`
    pub fn validate(&self, entries: &[TermEntry], candidate: &str, source: &str) -> TermValidation {
        let source_lower = source.to_lowercase();
        let candidate_lower = candidate.to_lowercase();

        let applicable: Vec<&TermEntry> = entries
            .iter()
            .filter(|entry| Self::applies(entry, &source_lower))
            .collect();
        if applicable.is_empty() {
            return TermValidation::empty(self.policy);
        }

        let mut used_terms = Vec::new();
        let mut missing_terms = Vec::new();
        let mut violations = Vec::new();
        for entry in &applicable {
            let target = entry.target_term.to_lowercase();
            if !target.is_empty() && candidate_lower.contains(&target) {
                used_terms.push(entry.source_term.clone());
            } else {
                missing_terms.push(entry.source_term.clone());
                if entry.approved {
                    violations.push(entry.source_term.clone());
                }
            }
        }

        let term_match_score = used_terms.len() as f64 / applicable.len() as f64 * 100.0;
        let compliance_score = match self.policy {
            EnforcementPolicy::Strict if !violations.is_empty() => 0.0,
            EnforcementPolicy::Strict => 100.0,
            EnforcementPolicy::Soft => {
                (100.0 - self.soft_penalty * missing_terms.len() as f64).max(0.0)
            }
        };

        TermValidation {
            term_match_score,
            missing_terms,
            used_terms,
            violations,
            compliance_score,
            policy: self.policy,
        }
    }
}
