//! Domain value strings found in free-form metadata.
//!
//! Three shapes are recognized:
//!
//! ```text
//! 1:Actif;2:Inactif      semicolon separated, colon pairs
//! 1=Actif,2=Inactif      comma separated, equals pairs
//! 1:Actif                a single colon pair
//! ```
//!
//! Codes must be base-10 integers; pairs with any other code are skipped.

use thiserror::Error;

use crate::catalog::CodeMap;

/// A value that has the shape of a domain string but holds no usable pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed domain string: {value:?}")]
pub struct MalformedValue {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Pairs { entry: char, pair: char },
    Single,
}

fn shape(value: &str) -> Option<Shape> {
    if value.contains(':') && value.contains(';') {
        Some(Shape::Pairs { entry: ';', pair: ':' })
    } else if value.contains('=') && value.contains(',') {
        Some(Shape::Pairs { entry: ',', pair: '=' })
    } else if value.contains(':') {
        Some(Shape::Single)
    } else {
        None
    }
}

/// Parse a domain string.
///
/// Returns an empty map when `value` is not a domain string at all, and
/// [`MalformedValue`] when it looks like one but no pair could be read.
pub fn parse_domain_string(value: &str) -> Result<CodeMap, MalformedValue> {
    let value = value.trim();
    let Some(shape) = shape(value) else {
        return Ok(CodeMap::new());
    };

    let values: CodeMap = match shape {
        Shape::Pairs { entry, pair } => value
            .split(entry)
            .filter_map(|part| parse_pair(part, pair))
            .collect(),
        Shape::Single => parse_pair(value, ':').into_iter().collect(),
    };

    if values.is_empty() {
        return Err(MalformedValue {
            value: value.to_string(),
        });
    }
    Ok(values)
}

fn parse_pair(part: &str, separator: char) -> Option<(i64, String)> {
    let (code, description) = part.split_once(separator)?;
    let code = code.trim().parse::<i64>().ok()?;
    Some((code, description.trim().to_string()))
}
