/*!
 * Minimal regex-based helpers for the XML interchange formats (TMX, TBX).
 *
 * These are not a general XML parser. They pull elements, attributes and text
 * out of well-formed documents the way CAT tools write them.
 */

use once_cell::sync::Lazy;
use regex::Regex;

/// Any tag, used to drop inline markup inside a text element
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// TMX inline native-code elements whose content is not translatable text
static INLINE_CODE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:bpt|ept|ph|it|ut)\b[^>]*>.*?</(?:bpt|ept|ph|it|ut)>").unwrap()
});

/// Numeric character references
static NUMERIC_ENTITY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap());

/// CDATA sections
static CDATA_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());

/// Decode the predefined XML entities and numeric references
pub fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_REGEX.replace_all(text, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text content of an element body with CDATA unwrapped, markup dropped and entities decoded
pub fn text_content(inner: &str) -> String {
    let unwrapped = CDATA_REGEX.replace_all(inner, "$1");
    let without_codes = INLINE_CODE_REGEX.replace_all(&unwrapped, "");
    let stripped = TAG_REGEX.replace_all(&without_codes, "");
    decode_entities(stripped.trim())
}

/// One `name="value"` or `name='value'` pair
static ATTRIBUTE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|\s)([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Every attribute of an opening tag in document order, values decoded
pub fn attributes(open_tag: &str) -> Vec<(&str, String)> {
    ATTRIBUTE_REGEX
        .captures_iter(open_tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let value = caps.get(2).or_else(|| caps.get(3))?;
            Some((name, decode_entities(value.as_str())))
        })
        .collect()
}

/// Value of an attribute inside an opening tag, e.g. `xml:lang` or `type`
pub fn attribute(open_tag: &str, name: &str) -> Option<String> {
    attributes(open_tag)
        .into_iter()
        .find(|(attr, _)| *attr == name)
        .map(|(_, value)| value)
}

/// Compile a regex matching `<name ...>body</name>`, capturing the attributes and the body
pub fn element_regex(name: &str) -> Regex {
    let name = regex::escape(name);
    // Literal element names always compile
    Regex::new(&format!(r"(?s)<{name}(\s[^>]*)?>(.*?)</{name}\s*>")).unwrap()
}

/// Attributes and body of every `name` element in `xml`
pub fn elements<'a>(re: &Regex, xml: &'a str) -> Vec<(&'a str, &'a str)> {
    re.captures_iter(xml)
        .map(|caps| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            (attrs, body)
        })
        .collect()
}
