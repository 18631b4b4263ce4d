use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{Priority, SyslogMessage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown syslog message format")]
    UnknownFormat,
    #[error("message is empty")]
    EmptyMessage,
}

/// A named syslog parser, selected per flow by the `syslog_format` key.
pub type SyslogParser = fn(&str) -> Result<SyslogMessage, ParseError>;

/// Look up a registered parser by name.
pub fn parser_for(name: &str) -> Option<SyslogParser> {
    match name {
        "RFC3164" => Some(parse_rfc3164),
        _ => None,
    }
}

/// Parse the RFC 3164 variant emitted by rsyslog with RFC 3339 timestamps:
/// `<PRI>TIMESTAMP HOSTNAME TAG MESSAGE`.
pub fn parse_rfc3164(raw: &str) -> Result<SyslogMessage, ParseError> {
    let mut fields = raw.splitn(4, ' ');
    let header = fields.next().ok_or(ParseError::UnknownFormat)?;
    let hostname = fields.next().ok_or(ParseError::UnknownFormat)?;
    let tag = fields.next().ok_or(ParseError::UnknownFormat)?;
    let message = fields.next().ok_or(ParseError::UnknownFormat)?;

    if !header.starts_with('<') {
        return Err(ParseError::UnknownFormat);
    }
    let pri_end = header.find('>').ok_or(ParseError::UnknownFormat)?;
    let priority: u8 = header[1..pri_end]
        .parse()
        .map_err(|_| ParseError::UnknownFormat)?;
    let (facility, severity) = Priority(priority).decode();

    let timestamp = DateTime::parse_from_rfc3339(&header[pri_end + 1..])
        .map_err(|_| ParseError::UnknownFormat)?
        .with_timezone(&Utc);

    let message = message.trim();
    if message.is_empty() {
        return Err(ParseError::EmptyMessage);
    }

    Ok(SyslogMessage {
        facility,
        severity,
        timestamp,
        hostname: hostname.to_string(),
        tag: tag.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syslog::models::{Facility, Severity};

    const RAW: &str = "<86>2016-07-23T14:48:16.970210+02:00 debian sudo: \
                       pam_unix(sudo:session): session closed for user root";

    #[test]
    fn parses_fixture() {
        let parsed = parse_rfc3164(RAW).unwrap();
        assert_eq!(Facility(10), parsed.facility);
        assert_eq!(Severity(6), parsed.severity);
        assert_eq!("debian", parsed.hostname);
        assert_eq!("sudo:", parsed.tag);
        assert_eq!("pam_unix(sudo:session): session closed for user root", parsed.message);
    }

    #[test]
    fn normalizes_timestamp_to_utc_millis() {
        let parsed = parse_rfc3164(RAW).unwrap();
        assert_eq!(1_469_278_096_970, parsed.timestamp.timestamp_millis());
    }

    #[test]
    fn trims_message_whitespace() {
        let raw = "<86>2016-07-23T14:48:16.970210+02:00 debian sudo: \t trailing \n";
        let parsed = parse_rfc3164(raw).unwrap();
        assert_eq!("trailing", parsed.message);
    }

    #[test]
    fn empty_message() {
        let raw = "<86>2016-07-23T14:48:16.969683+02:00 debian su[2106]: ";
        assert_eq!(Err(ParseError::EmptyMessage), parse_rfc3164(raw));
    }

    #[test]
    fn unknown_messages() {
        let bad = [
            "kfjlsdkfdlsjdlfgkdlsfghsdlfgkh",
            "<888>dsfdsfdsgsgd",
            "<aa>bla bla#@$@#4",
            "<84>bla bla#@$@#4",
            "<86>not-a-timestamp debian sudo: hello",
            "86>2016-07-23T14:48:16.970210+02:00 debian sudo: hello",
        ];
        for raw in bad {
            assert_eq!(Err(ParseError::UnknownFormat), parse_rfc3164(raw), "{raw}");
        }
    }

    #[test]
    fn priority_out_of_u8_range_is_rejected() {
        let raw = "<256>2016-07-23T14:48:16.970210+02:00 debian sudo: hello";
        assert_eq!(Err(ParseError::UnknownFormat), parse_rfc3164(raw));
    }

    #[test]
    fn registry_knows_rfc3164() {
        assert!(parser_for("RFC3164").is_some());
        assert!(parser_for("bad_format").is_none());
    }
}
