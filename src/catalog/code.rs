//! Canonical integer codes for coded-value domains.
//!
//! Destination columns store codes as INTEGER, while the authoring system
//! allows numeric, single-letter and free-text codes. The mapping is total
//! and deterministic across runs.

/// Modulus applied to hashed multi-character codes.
pub const HASHED_CODE_MODULUS: u64 = 1_000_000;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Map a textual code onto an integer.
///
/// 1. base-10 integers are returned verbatim
/// 2. a single character maps to its code point
/// 3. anything else maps to FNV-1a(text) modulo one million
pub fn normalize_code(code: &str) -> i64 {
    if let Ok(value) = code.parse::<i64>() {
        return value;
    }

    let mut chars = code.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return i64::from(u32::from(c));
    }

    hashed_code(code)
}

/// Stable hash code for a multi-character text code.
pub fn hashed_code(code: &str) -> i64 {
    // Below 10^6, so the cast cannot truncate.
    (fnv1a_64(code.as_bytes()) % HASHED_CODE_MODULUS) as i64
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_are_verbatim() {
        for text in ["0", "1", "42", "-7", "2024", "9223372036854775807"] {
            assert_eq!(normalize_code(text), text.parse::<i64>().unwrap());
        }
    }

    #[test]
    fn test_single_character_uses_code_point() {
        assert_eq!(normalize_code("A"), 65);
        assert_eq!(normalize_code("b"), 98);
        assert_eq!(normalize_code("é"), 0xE9);
    }

    #[test]
    fn test_single_characters_never_collide() {
        let mut seen = std::collections::HashSet::new();
        for c in (0x20u32..0x2FF).filter_map(char::from_u32) {
            if c.is_ascii_digit() {
                continue;
            }
            assert!(seen.insert(normalize_code(&c.to_string())), "collision on {c:?}");
        }
    }

    #[test]
    fn test_hashed_codes_are_stable_and_bounded() {
        let first = normalize_code("RES");
        assert_eq!(first, normalize_code("RES"));
        assert!((0..1_000_000).contains(&first));
        assert_ne!(normalize_code("RES"), normalize_code("COM"));
    }

    #[test]
    fn test_fnv_reference_value() {
        // FNV-1a 64 of "a" is 0xaf63dc4c8601ec8c.
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(hashed_code("a"), (0xaf63_dc4c_8601_ec8c_u64 % 1_000_000) as i64);
    }
}
