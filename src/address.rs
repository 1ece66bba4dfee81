//! Conversion between dotted-quad text and the 32-bit integer form of an IPv4 address.
//!
//! The integer form is big-endian: `a.b.c.d` maps to `(a << 24) | (b << 16) | (c << 8) | d`,
//! so numeric order matches the usual address order and the value can be used directly
//! as an index into a 2^32 bit space.

use std::fmt;
use std::net::Ipv4Addr;

/// 32-bit integer form of an IPv4 address.
pub type Address = u32;

/// Number of distinct addresses.
pub const ADDRESS_SPACE: u64 = 1 << 32;

/// Reason a line could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// Line does not split into exactly 4 dot separated tokens.
    TokenCount(usize),
    /// Token is empty or contains something other than decimal digits.
    NonNumeric,
    /// Token is numeric but greater than 255.
    OctetOutOfRange,
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatErrorKind::TokenCount(n) => write!(f, "expected 4 octets, found {n}"),
            FormatErrorKind::NonNumeric => f.write_str("octet is not a decimal number"),
            FormatErrorKind::OctetOutOfRange => f.write_str("octet is out of range [0, 255]"),
        }
    }
}

/// Line that does not decode to a valid address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {text:?}")]
pub struct FormatError {
    kind: FormatErrorKind,
    text: String,
}

impl FormatError {
    fn new(kind: FormatErrorKind, text: &[u8]) -> Self {
        Self {
            kind,
            text: String::from_utf8_lossy(text).into_owned(),
        }
    }

    pub fn kind(&self) -> FormatErrorKind {
        self.kind
    }

    /// Offending line with the terminator stripped.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Parse a dotted-quad line into an [`Address`].
///
/// The trailing line terminator and surrounding ASCII whitespace are ignored.
#[inline]
pub fn parse(line: &[u8]) -> Result<Address, FormatError> {
    let text = line.trim_ascii();

    let mut address: Address = 0;
    let mut tokens = 0;
    for token in text.split(|&b| b == b'.') {
        tokens += 1;
        if tokens > 4 {
            continue;
        }
        let octet = parse_octet(token).map_err(|kind| FormatError::new(kind, text))?;
        address = (address << 8) | Address::from(octet);
    }

    if tokens != 4 {
        return Err(FormatError::new(FormatErrorKind::TokenCount(tokens), text));
    }
    Ok(address)
}

/// Parse a dotted-quad string into an [`Address`].
pub fn parse_str(line: &str) -> Result<Address, FormatError> {
    parse(line.as_bytes())
}

/// Render an [`Address`] back to its dotted-quad form.
pub fn format(address: Address) -> String {
    Ipv4Addr::from(address).to_string()
}

#[inline]
fn parse_octet(token: &[u8]) -> Result<u8, FormatErrorKind> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Err(FormatErrorKind::NonNumeric);
    }
    if token.len() > 3 {
        return Err(FormatErrorKind::OctetOutOfRange);
    }
    let value = token
        .iter()
        .fold(0u16, |acc, &digit| acc * 10 + u16::from(digit - b'0'));
    u8::try_from(value).map_err(|_| FormatErrorKind::OctetOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0.0.0.0" => 0)]
    #[test_case("0.0.0.1" => 1)]
    #[test_case("1.1.1.1" => 0x0101_0101)]
    #[test_case("10.0.0.1\n" => 0x0a00_0001)]
    #[test_case("192.168.1.20\r\n" => 0xc0a8_0114)]
    #[test_case("  8.8.4.4 " => 0x0808_0404)]
    #[test_case("255.255.255.255" => u32::MAX)]
    #[test_case("001.002.003.004" => 0x0102_0304)]
    fn test_parse(line: &str) -> Address {
        parse_str(line).unwrap()
    }

    #[test_case("1.2.3" => FormatErrorKind::TokenCount(3))]
    #[test_case("1.2.3.4.5" => FormatErrorKind::TokenCount(5))]
    #[test_case("" => FormatErrorKind::NonNumeric)]
    #[test_case("\n" => FormatErrorKind::NonNumeric)]
    #[test_case("1..3.4" => FormatErrorKind::NonNumeric)]
    #[test_case("1.2.3.x" => FormatErrorKind::NonNumeric)]
    #[test_case("1.2.3.-4" => FormatErrorKind::NonNumeric)]
    #[test_case("1.2.3.256" => FormatErrorKind::OctetOutOfRange)]
    #[test_case("1.2.3.99999999999" => FormatErrorKind::OctetOutOfRange)]
    #[test_case("1.2.3.0004" => FormatErrorKind::OctetOutOfRange)]
    fn test_parse_malformed(line: &str) -> FormatErrorKind {
        parse_str(line).unwrap_err().kind()
    }

    #[test]
    fn test_format_inverts_parse() {
        for line in ["0.0.0.0", "10.0.0.1", "172.16.254.3", "255.255.255.255"] {
            assert_eq!(format(parse_str(line).unwrap()), line);
        }
    }

    #[test]
    fn test_error_keeps_text() {
        let err = parse_str("1.2.3\n").unwrap_err();
        assert_eq!(err.text(), "1.2.3");
        assert_eq!(err.to_string(), "expected 4 octets, found 3: \"1.2.3\"");
    }
}
