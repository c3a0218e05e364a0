//! Tolerant extraction of coded-value domains from catalog text.
//!
//! Catalog files embed domain definitions as XML fragments inside binary
//! records. The text handed to the parser is a lossy decode of those bytes,
//! so fragments may be interleaved with garbage, carry namespace prefixes,
//! or mix schema versions. Extraction is pattern based and never requires a
//! well-formed document: each domain block is processed on its own and a
//! block that yields nothing usable is dropped.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity};
use regex::Regex;
use tracing::debug;

use super::code::normalize_code;
use super::{CodeMap, DomainCatalog};

/// Current domain block tag.
static DOMAIN_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?GPCodedValueDomain2(?:\s[^>]*)?>.*?</(?:[\w.-]+:)?GPCodedValueDomain2\s*>")
        .unwrap()
});

/// Legacy domain block tag.
static LEGACY_DOMAIN_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?GPCodedValueDomain(?:\s[^>]*)?>.*?</(?:[\w.-]+:)?GPCodedValueDomain\s*>")
        .unwrap()
});

static DOMAIN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[\w.-]+:)?DomainName(?:\s[^>]*)?>([^<]+)</(?:[\w.-]+:)?DomainName\s*>")
        .unwrap()
});

static CODED_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?CodedValue(?:\s[^>]*)?>.*?</(?:[\w.-]+:)?CodedValue\s*>").unwrap()
});

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[\w.-]+:)?Code(?:\s[^>]*)?>([^<]+)</(?:[\w.-]+:)?Code\s*>").unwrap()
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[\w.-]+:)?Name(?:\s[^>]*)?>([^<]+)</(?:[\w.-]+:)?Name\s*>").unwrap()
});

/// Turns decoded catalog text into a [`DomainCatalog`].
///
/// Implementations must not fail: unusable input yields an empty catalog.
pub trait CatalogParser: Send + Sync {
    fn parse(&self, text: &str) -> DomainCatalog;
}

/// Regex based, non-validating parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexCatalogParser;

impl RegexCatalogParser {
    pub fn new() -> Self {
        Self
    }
}

impl CatalogParser for RegexCatalogParser {
    fn parse(&self, text: &str) -> DomainCatalog {
        let mut catalog = DomainCatalog::default();

        let blocks = DOMAIN_BLOCK_RE
            .find_iter(text)
            .chain(LEGACY_DOMAIN_BLOCK_RE.find_iter(text));

        for block in blocks {
            let Some((name, values)) = parse_domain_block(block.as_str()) else {
                continue;
            };
            debug!(domain = %name, values = values.len(), "Parsed coded-value domain");
            if catalog.insert(name.clone(), values).is_some() {
                debug!(domain = %name, "Domain defined twice, keeping the later block");
            }
        }

        catalog
    }
}

/// Count complete current-version domain blocks in `text`.
pub fn count_domain_blocks(text: &str) -> usize {
    DOMAIN_BLOCK_RE.find_iter(text).count()
}

/// Parse one domain block. `None` unless it has a name and at least one
/// usable coded value.
fn parse_domain_block(block: &str) -> Option<(String, CodeMap)> {
    let name = DOMAIN_NAME_RE
        .captures(block)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())?;

    let values: CodeMap = CODED_VALUE_RE
        .find_iter(block)
        .filter_map(|coded| parse_coded_value(coded.as_str()))
        .collect();

    if values.is_empty() {
        return None;
    }
    Some((name, values))
}

fn parse_coded_value(coded: &str) -> Option<(i64, String)> {
    let code = CODE_RE.captures(coded)?[1].trim().to_string();
    let description = NAME_RE.captures(coded)?[1].trim().to_string();
    if code.is_empty() || description.is_empty() {
        return None;
    }
    Some((normalize_code(&code), decode_entities(&description).into_owned()))
}

/// Longest entity name looked up.
const MAX_ENTITY_LEN: usize = 32;

/// Decode character and entity references one at a time.
///
/// A bare `&` or an unknown entity is kept as written, and the references
/// around it are still decoded.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(';')
            .filter(|&end| end <= MAX_ENTITY_LEN && push_entity(&after[..end], &mut decoded));
        match end {
            Some(end) => rest = &after[end + 1..],
            None => {
                decoded.push('&');
                rest = after;
            }
        }
    }
    decoded.push_str(rest);
    Cow::Owned(decoded)
}

/// Append the value of `name` (the text between `&` and `;`) when it is a
/// known entity or a valid character reference.
fn push_entity(name: &str, out: &mut String) -> bool {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => number.parse::<u32>().ok(),
        };
        return match code.and_then(char::from_u32).filter(|c| *c != '\0') {
            Some(c) => {
                out.push(c);
                true
            }
            None => false,
        };
    }

    match resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name)) {
        Some(value) => {
            out.push_str(value);
            true
        }
        None => false,
    }
}
