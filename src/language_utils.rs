use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for ISO language code handling
///
/// Documents, translation memories and termbases tag languages with anything
/// from `en` to `eng` to `en-US`. Everything here reduces such tags to a
/// comparable form: the primary subtag, normalized to ISO 639-2/T.

/// ISO 639-2/B codes that differ from their ISO 639-2/T counterpart
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Strip region/script subtags: `en-US` and `pt_BR` become `en` and `pt`
pub fn primary_subtag(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Normalize a language tag to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    let primary = primary_subtag(code);

    match primary.len() {
        2 => Language::from_639_1(&primary)
            .map(|lang| lang.to_639_3().to_string())
            .ok_or_else(|| anyhow!("Invalid language code: {}", code)),
        3 => {
            if Language::from_639_3(&primary).is_some() {
                return Ok(primary);
            }
            BIBLIOGRAPHIC_CODES
                .iter()
                .find(|(b, _)| *b == primary)
                .map(|(_, t)| t.to_string())
                .ok_or_else(|| anyhow!("Invalid language code: {}", code))
        }
        _ => Err(anyhow!("Invalid language code: {}", code)),
    }
}

/// Validate a language tag
pub fn validate_language_code(code: &str) -> Result<()> {
    normalize_to_part2t(code).map(|_| ())
}

/// Check if two language tags name the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_to_part2t(code1), normalize_to_part2t(code2)) {
        (Ok(a), Ok(b)) => a == b,
        // Unknown tags still match themselves
        _ => primary_subtag(code1) == primary_subtag(code2) && !primary_subtag(code1).is_empty(),
    }
}

/// Get the English language name from a tag
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_to_part2t(code)?;
    let lang = Language::from_639_3(&normalized)
        .ok_or_else(|| anyhow!("Failed to get language from code: {}", normalized))?;

    Ok(lang.to_name().to_string())
}

/// Human-readable language name, falling back to the raw tag
pub fn display_name(code: &str) -> String {
    get_language_name(code).unwrap_or_else(|_| code.to_string())
}

/// Key for a language pair, used to index termbases
pub fn language_pair_key(source: &str, target: &str) -> (String, String) {
    let key = |code: &str| normalize_to_part2t(code).unwrap_or_else(|_| primary_subtag(code));
    (key(source), key(target))
}
