//! Byte sizes in config files: `64KB`, `512 MB`, `2g`.

use thiserror::Error;

/// A size string that is not a whole number of bytes, KB, MB or GB.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{0}': expected a whole number with an optional KB, MB or GB suffix")]
pub struct SizeParseError(String);

/// Binary units, largest first.
const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

/// Parse a size string into bytes.
///
/// Suffixes are case-insensitive, the trailing `B` is optional and
/// whitespace may separate number and unit.
///
/// # Examples
///
/// ```
/// use gridcache::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("64 KB").unwrap(), 64 * 1024);
/// assert_eq!(parse_size("2g").unwrap(), 2 << 30);
/// ```
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let invalid = || SizeParseError(input.to_string());
    let text = input.trim().to_ascii_uppercase();
    let text = text.strip_suffix('B').unwrap_or(&text);

    let (number, multiplier) = match text.char_indices().last() {
        Some((at, unit @ ('K' | 'M' | 'G'))) => {
            let bytes = UNITS
                .iter()
                .find(|(name, _)| name.starts_with(unit))
                .map_or(1, |(_, bytes)| *bytes);
            (text[..at].trim_end(), bytes)
        }
        _ => (text, 1),
    };

    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Format bytes with the largest unit that divides them exactly.
///
/// ```
/// use gridcache::config::format_size;
///
/// assert_eq!(format_size(1024), "1KB");
/// assert_eq!(format_size(3 << 30), "3GB");
/// assert_eq!(format_size(1000), "1000");
/// ```
pub fn format_size(bytes: u64) -> String {
    UNITS
        .iter()
        .find(|(_, unit)| bytes >= *unit && bytes % unit == 0)
        .map(|(name, unit)| format!("{}{}", bytes / unit, name))
        .unwrap_or_else(|| bytes.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("12B").unwrap(), 12);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("1K").unwrap(), KB);
        assert_eq!(parse_size("16kb").unwrap(), 16 * KB);
        assert_eq!(parse_size("500MB").unwrap(), 500 * MB);
        assert_eq!(parse_size("1m").unwrap(), MB);
        assert_eq!(parse_size("  2GB ").unwrap(), 2 * GB);
        assert_eq!(parse_size("500 MB").unwrap(), 500 * MB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "B", "GB", "abc", "2TB", "-1GB", "1.5GB", "+5", "1 2KB"] {
            assert!(parse_size(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size("99999999999999GB").is_err());
    }

    #[test]
    fn test_format_picks_exact_unit() {
        assert_eq!(format_size(KB), "1KB");
        assert_eq!(format_size(MB), "1MB");
        assert_eq!(format_size(2 * GB), "2GB");
        assert_eq!(format_size(1536 * KB), "1536KB");
        assert_eq!(format_size(0), "0");
    }

    #[test]
    fn test_format_output_parses_back() {
        for bytes in [64 * KB, 500 * MB, 2 * GB, 4097] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
