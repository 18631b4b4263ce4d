use std::fmt;

use chrono::{DateTime, Utc};

/// Syslog severity code (0-7), from /usr/include/sys/syslog.h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Severity(pub u8);

/// Syslog facility code (0-23), from /usr/include/sys/syslog.h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facility(pub u8);

/// Encoded syslog priority: `facility * 8 + severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority(pub u8);

impl Priority {
    pub fn decode(self) -> (Facility, Severity) {
        (Facility(self.0 / 8), Severity(self.0 % 8))
    }

    pub fn encode(facility: Facility, severity: Severity) -> Self {
        Priority(facility.0 * 8 + severity.0)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "EMERG",
            1 => "ALERT",
            2 => "CRIT",
            3 => "ERR",
            4 => "WARNING",
            5 => "NOTICE",
            6 => "INFO",
            7 => "DEBUG",
            _ => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "KERN",
            1 => "USER",
            2 => "MAIL",
            3 => "DAEMON",
            4 => "AUTH",
            5 => "SYSLOG",
            6 => "LPR",
            7 => "NEWS",
            8 => "UUCP",
            9 => "CLOCK",
            10 => "AUTHPRIV",
            11 => "FTP",
            12 => "NTP",
            13 => "LOGAUDIT",
            14 => "LOGALERT",
            15 => "CRON",
            16 => "LOCAL0",
            17 => "LOCAL1",
            18 => "LOCAL2",
            19 => "LOCAL3",
            20 => "LOCAL4",
            21 => "LOCAL5",
            22 => "LOCAL6",
            23 => "LOCAL7",
            _ => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// A parsed syslog record. Immutable after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: Facility,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub tag: String,
    pub message: String,
}

impl fmt::Display for SyslogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FACILITY={} SEVERITY={} TIMESTAMP={} HOSTNAME={} TAG={} MESSAGE={}",
            self.facility, self.severity, self.timestamp, self.hostname, self.tag, self.message
        )
    }
}
