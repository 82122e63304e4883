//! Metadata encoded in record filenames.
//!
//! Filename example: `20170315T01:00:00Z_173.205.3.39_0.web100`. Older
//! records omit the address: `20170315T01:00:00Z_ALL0.web100`.

use std::net::{IpAddr, Ipv6Addr};

use thiserror::Error;

use crate::RecordDate;

/// Substring identifying web100 measurement records.
pub const WEB100_MARKER: &str = "web100";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpParseError {
    /// The name has no `_<ip>_` segment (old filename format).
    #[error("filename has no address segment")]
    Missing,

    /// The segment exists but is not an address.
    #[error("invalid address segment '{0}'")]
    Invalid(String),
}

impl IpParseError {
    /// Short label used when counting failures.
    pub fn kind(&self) -> &'static str {
        match self {
            IpParseError::Missing => "missing",
            IpParseError::Invalid(_) => "invalid",
        }
    }
}

pub fn is_web100(name: &str) -> bool {
    name.contains(WEB100_MARKER)
}

/// Extract the address between the first and the last underscore.
pub fn parse_ip(name: &str) -> Result<IpAddr, IpParseError> {
    let (Some(start), Some(end)) = (name.find('_'), name.rfind('_')) else {
        return Err(IpParseError::Missing);
    };
    if start >= end {
        return Err(IpParseError::Missing);
    }
    normalize_ip(&name[start + 1..end])
}

/// Canonical text form of the embedded address, if any.
pub fn parse_ip_str(name: &str) -> Option<String> {
    parse_ip(name).ok().map(|ip| ip.to_string())
}

/// Parse an address token into its canonical form.
///
/// Accepts dotted quads, any textual IPv6 form (zero padded groups,
/// uncompressed zero runs, upper case, brackets) and IPv6 written with `-`
/// between groups. IPv4-mapped IPv6 addresses collapse to IPv4.
pub fn normalize_ip(token: &str) -> Result<IpAddr, IpParseError> {
    let trimmed = token
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ip.to_canonical());
    }
    if !trimmed.contains(':') && trimmed.contains('-') {
        if let Ok(ip) = trimmed.replace('-', ":").parse::<Ipv6Addr>() {
            return Ok(IpAddr::V6(ip).to_canonical());
        }
    }
    Err(IpParseError::Invalid(token.to_string()))
}

/// Parse the leading `YYYYMMDD`. Never panics on short or odd input.
pub fn parse_date(name: &str) -> Option<RecordDate> {
    let digits = name.get(0..8)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    RecordDate::from_yyyymmdd(digits.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let ip = parse_ip("20170225T23:00:00Z_4.34.58.34_0.web100.gz").unwrap();
        assert_eq!(ip.to_string(), "4.34.58.34");
        assert_eq!(
            parse_ip_str("20170315T01:00:00Z_173.205.3.39_0.web100").as_deref(),
            Some("173.205.3.39")
        );
    }

    #[test]
    fn test_old_format_has_no_ip() {
        assert_eq!(
            parse_ip("20170225T23:00:00Z_ALL0.web100.gz"),
            Err(IpParseError::Missing)
        );
        assert_eq!(parse_ip("20170225T23:00:00Z.web100"), Err(IpParseError::Missing));
        assert_eq!(parse_ip_str("20170225T23:00:00Z_ALL0.web100.gz"), None);
    }

    #[test]
    fn test_ipv6_is_normalized() {
        let ip = parse_ip("20170225T23:00:00Z_2001:4C08:2003:0002:0000:0000:0000:0016_0.web100")
            .unwrap();
        assert_eq!(ip.to_string(), "2001:4c08:2003:2::16");

        let dashed = parse_ip("20170225T23:00:00Z_2001-4c08-2003-2--16_0.web100").unwrap();
        assert_eq!(dashed, ip);

        let mapped = normalize_ip("::ffff:4.34.58.34").unwrap();
        assert_eq!(mapped.to_string(), "4.34.58.34");
    }

    #[test]
    fn test_invalid_segment_is_distinct_error() {
        let err = parse_ip("20170225T23:00:00Z_not-an-ip_0.web100").unwrap_err();
        assert_eq!(err, IpParseError::Invalid("not-an-ip".to_string()));
        assert_eq!(err.kind(), "invalid");
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date("20170225T23:00:00Z_4.34.58.34_0.web100.gz").unwrap();
        assert_eq!(date.as_u32(), 20170225);
        assert_eq!(parse_date("2017"), None);
        assert_eq!(parse_date("2017ab25T23:00:00Z_0.web100"), None);
        assert_eq!(parse_date("20171345T23:00:00Z_0.web100"), None);
        assert_eq!(parse_date("+2017022T"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_non_ascii_names_do_not_panic() {
        assert_eq!(parse_date("2017é0225T"), None);
        assert!(parse_ip("é_é").is_err());
    }
}
