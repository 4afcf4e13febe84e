//! Phone-number identity resolution.
//!
//! Group rosters and question instances are written by different paths and
//! disagree on formatting: one side may carry the country code, punctuation or
//! a leading `+`, the other may not. Every roster/instance comparison goes
//! through [`normalize_phone`] so both analytics engines agree on identity.

/// Country code stripped when no other is configured.
pub const DEFAULT_COUNTRY_CODE: &str = "55";

/// Length of a national number (area code + subscriber) once the country
/// code is removed.
const NATIONAL_NUMBER_LEN: usize = 11;

/// Normalize a raw phone number using [`DEFAULT_COUNTRY_CODE`].
pub fn normalize_phone(raw: &str) -> String {
    normalize_phone_with(raw, DEFAULT_COUNTRY_CODE)
}

/// Normalize a raw phone number.
///
/// Keeps only ASCII digits, then drops `country_code` while the digits start
/// with it and are longer than a national number. Stripping repeats so that
/// the result is a fixed point: normalizing it again changes nothing.
/// Returns an empty string when the input has no digits.
pub fn normalize_phone_with(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if country_code.is_empty() {
        return digits;
    }

    let mut national = digits.as_str();
    while national.len() > NATIONAL_NUMBER_LEN && national.starts_with(country_code) {
        national = &national[country_code.len()..];
    }

    national.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_country_code() {
        assert_eq!(normalize_phone("5511999999999"), "11999999999");
        assert_eq!(normalize_phone("11999999999"), "11999999999");
    }

    #[test]
    fn test_strips_punctuation() {
        assert_eq!(normalize_phone("+55 (11) 99999-9999"), "11999999999");
        assert_eq!(normalize_phone("whatsapp:+5511999999999"), "11999999999");
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "5511988887777",
            "11977776666",
            "+55 11 9 8888-7777",
            "555511988887777",
            "123",
            "",
        ] {
            let once = normalize_phone(raw);
            assert_eq!(normalize_phone(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_short_numbers_keep_prefix() {
        // 11 digits starting with 55 is a national number, not a prefixed one
        assert_eq!(normalize_phone("55999998888"), "55999998888");
    }

    #[test]
    fn test_empty_and_non_numeric() {
        assert_eq!(normalize_phone(""), "");
        assert_eq!(normalize_phone("unknown"), "");
    }

    #[test]
    fn test_custom_country_code() {
        assert_eq!(normalize_phone_with("351912345678901", "351"), "912345678901");
        assert_eq!(normalize_phone_with("5511999999999", "351"), "5511999999999");
    }
}
