/*!
 * Tests for loading translation memories and termbases from disk
 */

use tmqe::memory::{MatchType, SimilarityMetric, TmMatcher};
use tmqe::terms::{EnforcementPolicy, TermStore, TermValidator};

use crate::common;

const SAMPLE_TMX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tmx version="1.4">
  <header srclang="en-US" creationtool="DeepL" datatype="plaintext"/>
  <body>
    <tu>
      <tuv xml:lang="en-US"><seg>Save the file</seg></tuv>
      <tuv xml:lang="fr-FR"><seg>Enregistrer le fichier</seg></tuv>
      <tuv xml:lang="de-DE"><seg>Datei speichern</seg></tuv>
    </tu>
    <tu creationtool="SDL Trados Studio">
      <tuv xml:lang="en-US"><seg>Save the file</seg></tuv>
      <tuv xml:lang="fr-FR"><seg>Sauvegarder le fichier</seg></tuv>
    </tu>
    <tu>
      <tuv xml:lang="en-US"><seg>Close &amp; exit</seg></tuv>
      <tuv xml:lang="fr-FR"><seg>Fermer et quitter</seg></tuv>
    </tu>
  </body>
</tmx>"#;

const SAMPLE_TBX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tbx type="TBX-Basic" style="dct" xml:lang="en">
  <text><body>
    <conceptEntry id="c1">
      <langSet xml:lang="en-GB">
        <tig><term>invoice</term></tig>
        <tig><term>bill</term></tig>
      </langSet>
      <langSet xml:lang="fr-CA">
        <tig><term>bordereau</term><termNote type="administrativeStatus">deprecatedTerm-admn-sts</termNote></tig>
        <tig><term>facture</term><termNote type="administrativeStatus">preferredTerm-admn-sts</termNote></tig>
      </langSet>
    </conceptEntry>
  </body></text>
</tbx>"#;

#[test]
fn test_load_tmxFile_shouldPreferHumanEntriesForTargetLanguage() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "memory.tmx", SAMPLE_TMX).unwrap();

    let mut matcher = TmMatcher::new(0.75, SimilarityMetric::SequenceRatio).with_target_lang("fr");
    assert!(matcher.load(&path));

    let exact = matcher.match_segment("Save the file");
    assert_eq!(exact.match_type, MatchType::Exact);
    assert_eq!(exact.translation.as_deref(), Some("Sauvegarder le fichier"));

    let escaped = matcher.match_segment("Close & exit");
    assert_eq!(escaped.translation.as_deref(), Some("Fermer et quitter"));

    let fuzzy = matcher.match_segment("Save the files");
    assert_eq!(fuzzy.match_type, MatchType::Fuzzy);
    assert_eq!(fuzzy.translation.as_deref(), Some("Sauvegarder le fichier"));
}

#[test]
fn test_load_jsonMemory_shouldPreferHumanEntry() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "memory.json", common::SAMPLE_MEMORY).unwrap();

    let mut matcher = TmMatcher::new(0.75, SimilarityMetric::SequenceRatio).with_target_lang("fr");
    assert!(matcher.load(&path));

    let result = matcher.match_segment("Hello world");
    assert_eq!(result.translation.as_deref(), Some("Bonjour le monde"));
}

#[test]
fn test_load_unreadableMemory_shouldReportFailureAndKeepIndex() {
    let dir = common::create_temp_dir().unwrap();
    let garbage = common::create_test_file(dir.path(), "memory.txt", "not a memory").unwrap();

    let mut matcher = common::sample_matcher(0.75);
    assert!(!matcher.load(&garbage));
    assert!(!matcher.load(dir.path().join("missing.tmx")));

    assert!(matcher.is_loaded());
    assert_eq!(matcher.match_segment("Hello world").match_type, MatchType::Exact);
}

#[test]
fn test_load_tbxFile_withRegionTags_shouldResolvePair() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "terms.tbx", SAMPLE_TBX).unwrap();

    let mut store = TermStore::new(TermValidator::new(EnforcementPolicy::Strict, 0.1));
    assert!(store.load(&path, "en", "fr"));

    let entries = store.entries("en", "fr");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].target_term, "facture");
    assert!(entries[0].approved);
    assert_eq!(entries[0].variants, vec!["bill".to_string()]);

    let extracted = store.extract_for_segment("Please pay the bill today", "en", "fr", 5, 0.8);
    assert_eq!(extracted.len(), 1);

    let validation = store.validate("Veuillez payer le bordereau", "Please pay the bill", "en", "fr");
    assert!(validation.is_blocking());
}

#[test]
fn test_load_jsonTermbase_shouldBeScopedToItsPair() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "terms.json",
        r#"{"terms": [{"source_term": "overdue", "target_term": "en retard"}]}"#,
    )
    .unwrap();

    let mut store = common::empty_terms();
    assert!(store.load(&path, "en", "fr"));

    assert_eq!(store.entries("en", "fr").len(), 1);
    assert!(store.entries("en", "fr")[0].approved);
    assert!(store.entries("en", "de").is_empty());
    assert!(store.entries("fr", "en").is_empty());
}
