/*!
 * Randomized invariant checks for the translation-memory matcher
 */

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tmqe::memory::{MatchType, SimilarityMetric, TmIndex, TmMatcher};

use crate::common;

const WORDS: &[&str] = &[
    "the", "invoice", "is", "overdue", "hello", "world", "again", "please", "pay", "today", "order",
    "shipped", "account", "closed",
];

fn random_sentence(rng: &mut StdRng) -> String {
    let len = rng.random_range(1..6);
    (0..len)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn random_matcher(rng: &mut StdRng, threshold: f64) -> (TmMatcher, Vec<String>) {
    let mut index = TmIndex::new();
    let mut sources = Vec::new();
    for i in 0..20 {
        let source = random_sentence(rng);
        index.insert(common::memory_entry(&source, &format!("cible {}", i), i % 3 == 0));
        sources.push(source);
    }
    let matcher = TmMatcher::new(threshold, SimilarityMetric::SequenceRatio)
        .with_target_lang("fr")
        .with_index(index);
    (matcher, sources)
}

#[test]
fn test_similarity_randomPairs_shouldStayInRangeAndBeOneOnlyWhenEqual() {
    let mut rng = StdRng::seed_from_u64(11);
    for metric in [SimilarityMetric::SequenceRatio, SimilarityMetric::Levenshtein] {
        for _ in 0..300 {
            let a = random_sentence(&mut rng);
            let b = random_sentence(&mut rng);
            let score = metric.similarity(&a, &b);

            assert!((0.0..=1.0).contains(&score), "{} out of range for {:?}", score, metric);
            assert_eq!(score == 1.0, a == b, "{:?} vs {:?}", a, b);
            assert_eq!(metric.similarity(&a, &a), 1.0);
        }
    }
}

#[test]
fn test_matchSegment_randomQueries_shouldPartitionByThreshold() {
    let mut rng = StdRng::seed_from_u64(42);
    for threshold in [0.5, 0.75, 0.9] {
        let (matcher, sources) = random_matcher(&mut rng, threshold);
        for _ in 0..200 {
            let query = random_sentence(&mut rng);
            let result = matcher.match_segment(&query);

            match result.match_type {
                MatchType::Exact => {
                    assert_eq!(result.similarity, 1.0);
                    assert!(sources.contains(&query));
                    assert!(result.translation.is_some());
                }
                MatchType::Fuzzy => {
                    assert!(result.similarity >= threshold);
                    assert!(result.similarity < 1.0);
                    assert!(result.translation.is_some());
                    assert!(matcher.should_repair(result.similarity));
                }
                MatchType::None => {
                    assert!(result.translation.is_none());
                    assert!(result.similarity < threshold);
                    assert!(matcher.should_generate(result.similarity));
                }
            }
        }
    }
}

#[test]
fn test_matchSegment_indexedSources_shouldAlwaysBeExact() {
    let mut rng = StdRng::seed_from_u64(7);
    let (matcher, sources) = random_matcher(&mut rng, 0.75);
    for source in &sources {
        let padded = format!("  {}\t", source);
        assert_eq!(matcher.match_segment(source).match_type, MatchType::Exact);
        assert_eq!(matcher.match_segment(&padded).match_type, MatchType::Exact);
    }
}

#[test]
fn test_matchSegment_otherTargetLanguage_shouldNotMatch() {
    let matcher = common::sample_matcher(0.5);
    let german = TmMatcher::new(0.5, SimilarityMetric::SequenceRatio)
        .with_target_lang("de")
        .with_index(matcher.index().clone());

    let result = german.match_segment("Hello world");

    assert_eq!(result.match_type, MatchType::None);
    assert!(result.translation.is_none());
}

#[test]
fn test_matchSegment_truncatedWord_shouldRepairHumanEntry() {
    let mut index = TmIndex::new();
    index.insert(common::memory_entry("Hello world", "Salut le monde", false));
    index.insert(common::memory_entry("Hello world", "Bonjour le monde", true));
    let mut german = common::memory_entry("Hello worl", "Hallo Welt", true);
    german.target_lang = "de".to_string();
    index.insert(german);
    let matcher = TmMatcher::new(0.75, SimilarityMetric::SequenceRatio)
        .with_target_lang("fr")
        .with_index(index);

    let result = matcher.match_segment("Hello worl");

    assert_eq!(result.match_type, MatchType::Fuzzy);
    assert_eq!(result.translation.as_deref(), Some("Bonjour le monde"));
    assert!((result.similarity - 20.0 / 21.0).abs() < 1e-3);
    assert!(matcher.should_repair(result.similarity));
    assert!(!matcher.should_generate(result.similarity));
}

#[test]
fn test_matchSegment_keyDiffersOnlyInWhitespace_shouldStayBelowExact() {
    let mut index = TmIndex::new();
    index.insert(common::memory_entry("Hello world  ", "Bonjour le monde", true));
    let matcher = TmMatcher::new(0.75, SimilarityMetric::SequenceRatio)
        .with_target_lang("fr")
        .with_index(index);

    let result = matcher.match_segment("Hello world");

    assert_eq!(result.match_type, MatchType::Fuzzy);
    assert!(result.similarity < 1.0);
    assert!(matcher.should_repair(result.similarity));
}

#[test]
fn test_matchSegment_onlyOtherLanguageCandidates_shouldGenerate() {
    let mut index = TmIndex::new();
    let mut german = common::memory_entry("Hello world", "Hallo Welt", true);
    german.target_lang = "de".to_string();
    index.insert(german);
    let matcher = TmMatcher::new(0.75, SimilarityMetric::SequenceRatio)
        .with_target_lang("fr")
        .with_index(index);

    let result = matcher.match_segment("Hello worl");

    assert_eq!(result.match_type, MatchType::None);
    assert!(result.translation.is_none());
    assert!(matcher.should_generate(result.similarity));
}
