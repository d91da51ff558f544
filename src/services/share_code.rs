//! Share code shape rules and random generation.

use rand::{Rng, distr::Alphanumeric};

/// Length of generated codes.
pub const GENERATED_CODE_LEN: usize = 6;
pub const MIN_CODE_LEN: usize = 6;
pub const MAX_CODE_LEN: usize = 16;

/// A caller-chosen code must be 6–16 ASCII letters or digits.
pub fn is_valid_code(code: &str) -> bool {
    (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A random code of [`GENERATED_CODE_LEN`] ASCII letters and digits.
pub fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CODE_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_codes_within_bounds() {
        assert!(is_valid_code("abc123"));
        assert!(is_valid_code("ABCDEFGHIJKLMNOP"));
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(!is_valid_code("abc12"));
        assert!(!is_valid_code("ABCDEFGHIJKLMNOPQ"));
        assert!(!is_valid_code("abc-123"));
        assert!(!is_valid_code("abc 123"));
        assert!(!is_valid_code("äbc1234"));
        assert!(!is_valid_code(""));
    }

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), GENERATED_CODE_LEN);
            assert!(is_valid_code(&code), "{code}");
        }
    }
}
