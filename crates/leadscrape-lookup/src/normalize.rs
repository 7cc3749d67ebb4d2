//! Phone number normalization.
//!
//! Listings show the same number as `+20 11 1234 5678`, `0020111...`,
//! `20111...` or `0111...`. All of them map to one national key with a
//! leading trunk zero, which is what the cache and the prefix table use.

/// Shortest national number accepted, trunk zero included.
const MIN_DIGITS: usize = 6;

/// Digits that must follow a bare country code for it to be stripped.
const MIN_DIGITS_AFTER_BARE_CODE: usize = 8;

/// Normalize `raw` to a national key for `country_code`.
///
/// Returns `None` when too few digits remain to be a phone number.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let country_code: String = country_code.chars().filter(char::is_ascii_digit).collect();
    let international = raw.trim_start().starts_with('+');

    let national = if country_code.is_empty() {
        digits.as_str()
    } else if let Some(rest) = digits
        .strip_prefix("00")
        .and_then(|rest| rest.strip_prefix(country_code.as_str()))
    {
        rest
    } else if let Some(rest) = digits.strip_prefix(country_code.as_str()) {
        // A bare `cc` prefix is only trusted when the remainder still looks
        // like a full national number.
        if international || rest.len() >= MIN_DIGITS_AFTER_BARE_CODE {
            rest
        } else {
            digits.as_str()
        }
    } else {
        digits.as_str()
    };

    let key = if national.starts_with('0') {
        national.to_string()
    } else {
        format!("0{national}")
    };

    if key.len() < MIN_DIGITS {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_code_variants_share_a_key() {
        let expected = Some("01112345678".to_string());
        for raw in [
            "01112345678",
            "+20 111 234 5678",
            "+201112345678",
            "00201112345678",
            "201112345678",
            "(011) 1234-5678",
            "1112345678",
        ] {
            assert_eq!(normalize_phone(raw, "20"), expected, "input: {raw}");
        }
    }

    #[test]
    fn test_short_local_number_keeps_leading_digits() {
        // Starts with the country code digits but is a short landline.
        assert_eq!(
            normalize_phone("2012345", "20"),
            Some("02012345".to_string())
        );
    }

    #[test]
    fn test_rejects_non_numbers() {
        assert_eq!(normalize_phone("", "20"), None);
        assert_eq!(normalize_phone("call us", "20"), None);
        assert_eq!(normalize_phone("123", "20"), None);
    }

    #[test]
    fn test_without_country_code() {
        assert_eq!(
            normalize_phone("0111234567", ""),
            Some("0111234567".to_string())
        );
    }
}
