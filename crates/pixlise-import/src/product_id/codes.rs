//! Mixed base-10/base-26 field codes used inside product identifiers.
//!
//! Letters are upper-case only; a lower-case letter is outside the grammar.

fn digits(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn letter(b: u8) -> Option<i32> {
    b.is_ascii_uppercase().then(|| i32::from(b - b'A'))
}

fn digit(b: u8) -> Option<i32> {
    b.is_ascii_digit().then(|| i32::from(b - b'0'))
}

/// Decodes a 3 character site code.
///
/// ```text
/// 000-999  -> 0-999
/// A00-Z99  -> 1000-3599
/// AA0-ZZ9  -> 3600-10359
/// AAA-ZZZ  -> 10360-27935
/// 0AA-7DV  -> 27936-32767
/// ```
pub fn site_code(site: &str) -> Option<i32> {
    let b = site.as_bytes();
    if b.len() != 3 || !site.is_ascii() {
        return None;
    }
    if let Some(v) = digits(site) {
        return Some(v);
    }
    if let (Some(l), Some(rest)) = (letter(b[0]), digits(&site[1..])) {
        return Some(1000 + l * 100 + rest);
    }
    if let (Some(l1), Some(l2), Some(d)) = (letter(b[0]), letter(b[1]), digit(b[2])) {
        return Some(3600 + l1 * 260 + l2 * 10 + d);
    }
    if let (Some(l1), Some(l2), Some(l3)) = (letter(b[0]), letter(b[1]), letter(b[2])) {
        return Some(10360 + l1 * 676 + l2 * 26 + l3);
    }
    if let (Some(d), Some(l1), Some(l2)) = (digit(b[0]), letter(b[1]), letter(b[2])) {
        let v = 27936 + d * 676 + l1 * 26 + l2;
        return (v <= i32::from(i16::MAX)).then_some(v);
    }
    None
}

/// Decodes a 4 character drive code.
///
/// ```text
/// 0000-9999 -> 0-9999
/// A000-Z999 -> 10000-35999
/// AA00-LJ35 -> 36000-65535
/// ```
pub fn drive_code(drive: &str) -> Option<i32> {
    let b = drive.as_bytes();
    if b.len() != 4 || !drive.is_ascii() {
        return None;
    }
    if let Some(v) = digits(drive) {
        return Some(v);
    }
    if let (Some(l), Some(rest)) = (letter(b[0]), digits(&drive[1..])) {
        return Some(10000 + l * 1000 + rest);
    }
    if let (Some(l1), Some(l2), Some(rest)) = (letter(b[0]), letter(b[1]), digits(&drive[2..])) {
        let v = 36000 + l1 * 2600 + l2 * 100 + rest;
        return (v <= i32::from(u16::MAX)).then_some(v);
    }
    None
}

/// Decodes a 2 character version code: `01`-`99`, then `A0`.., then `AA`..
pub fn version_code(version: &str) -> Option<i32> {
    let b = version.as_bytes();
    if b.len() != 2 {
        return None;
    }
    if let Some(v) = digits(version) {
        return Some(v);
    }
    let l1 = letter(b[0])?;
    if let Some(d) = digit(b[1]) {
        return Some(100 + l1 * 36 + d);
    }
    letter(b[1]).map(|l2| 110 + l1 * 36 + l2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_site_codes() {
        let cases = [
            ("123", 123),
            ("B01", 1101),
            ("AA9", 3609),
            ("AB8", 3618),
            ("ZZ9", 10359),
            ("AAZ", 10385),
            ("ZZZ", 27935),
            ("0AA", 27936),
            ("0BZ", 27987),
            ("7CZ", 32745),
            ("7DV", 32767),
        ];
        for (code, expected) in cases {
            assert_eq!(site_code(code), Some(expected), "site {code}");
        }
        for bad in ["7DW", "6", "HELLO", "a00"] {
            assert_eq!(site_code(bad), None, "site {bad}");
        }
    }

    #[test]
    fn test_drive_codes() {
        let cases = [
            ("0000", 0),
            ("1234", 1234),
            ("9999", 9999),
            ("A000", 10000),
            ("B001", 11001),
            ("Z000", 35000),
            ("AZ99", 38599),
            ("BB99", 38799),
            ("LJ00", 65500),
            ("LJ35", 65535),
        ];
        for (code, expected) in cases {
            assert_eq!(drive_code(code), Some(expected), "drive {code}");
        }
        for bad in ["LJ36", "300", "A00", "ZAZA"] {
            assert_eq!(drive_code(bad), None, "drive {bad}");
        }
    }

    #[test]
    fn test_version_codes() {
        let cases = [
            ("01", 1),
            ("55", 55),
            ("99", 99),
            ("A0", 100),
            ("AZ", 135),
            ("BA", 146),
            ("BZ", 171),
            ("Z0", 1000),
            ("Z9", 1009),
            ("ZZ", 1035),
        ];
        for (code, expected) in cases {
            assert_eq!(version_code(code), Some(expected), "version {code}");
        }
        for bad in ["Test", "3", "a1", "1A"] {
            assert_eq!(version_code(bad), None, "version {bad}");
        }
    }
}
