use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{File, FileFormat};
use thiserror::Error;
use url::Url;

use crate::cloudwatch::MIN_UPLOAD_DELAY_MS;
use crate::syslog::render::{RenderError, Template};
use crate::syslog::{parser_for, Facility, Severity, SyslogMessage};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/logs_agent.cfg";

const MAIN_SECTION: &str = "main";
const MAX_NAME_LEN: usize = 512;
const GROUP_NAME_CHARS: &str = "_-/.";
const DEFAULT_QUEUE_SIZE: usize = 50_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Read(#[from] config::ConfigError),
    #[error("missing key {key} in section {section}")]
    MissingKey { section: String, key: String },
    #[error("bad value of {key} in section {section}: {reason}")]
    BadValue {
        section: String,
        key: String,
        reason: ValueError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("empty value")]
    Empty,
    #[error("name too long")]
    TooLong,
    #[error("invalid value")]
    Invalid,
    #[error("invalid network scheme")]
    InvalidScheme,
    #[error("not a valid URL: {0}")]
    BadUrl(url::ParseError),
    #[error("unknown syslog format")]
    UnknownFormat,
    #[error("bad template: {0}")]
    BadTemplate(RenderError),
    #[error("not a number")]
    NotANumber,
    #[error("value too small")]
    TooSmall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Syslog,
    Stdout,
    Stderr,
    Null,
}

#[derive(Debug, Clone)]
pub struct MainConfig {
    pub log_level: LogLevel,
    pub log_output: LogOutput,
}

impl Default for MainConfig {
    fn default() -> Self {
        MainConfig {
            log_level: LogLevel::Error,
            log_output: LogOutput::Syslog,
        }
    }
}

/// One `source -> group/stream` pipeline, from one config section.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub name: String,
    pub source: Url,
    pub group: String,
    pub stream: String,
    pub syslog_format: String,
    pub cloudwatch_format: String,
    pub upload_delay: Duration,
    pub queue_size: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub main: MainConfig,
    pub flows: Vec<FlowConfig>,
}

pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
    let sections: HashMap<String, HashMap<String, String>> = config::Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini))
        .build()?
        .try_deserialize()?;
    from_sections(sections)
}

fn from_sections(
    mut sections: HashMap<String, HashMap<String, String>>,
) -> Result<AgentConfig, ConfigError> {
    let main = match sections.remove(MAIN_SECTION) {
        Some(keys) => parse_main(&keys)?,
        None => MainConfig::default(),
    };

    let mut flows = sections
        .into_iter()
        .map(|(name, keys)| parse_flow(name, &keys))
        .collect::<Result<Vec<_>, _>>()?;
    // Deterministic startup order; the section map does not keep one.
    flows.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(AgentConfig { main, flows })
}

fn parse_main(keys: &HashMap<String, String>) -> Result<MainConfig, ConfigError> {
    let mut main = MainConfig::default();
    if let Some(value) = keys.get("log_level") {
        main.log_level = match value.as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "error" => LogLevel::Error,
            _ => return Err(bad_value(MAIN_SECTION, "log_level", validate_choice(value))),
        };
    }
    if let Some(value) = keys.get("log_output") {
        main.log_output = match value.as_str() {
            "syslog" => LogOutput::Syslog,
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            "null" => LogOutput::Null,
            _ => return Err(bad_value(MAIN_SECTION, "log_output", validate_choice(value))),
        };
    }
    Ok(main)
}

fn parse_flow(name: String, keys: &HashMap<String, String>) -> Result<FlowConfig, ConfigError> {
    let group = require(&name, keys, "group")?;
    validate_group(group).map_err(|reason| bad_value(&name, "group", reason))?;

    let stream = require(&name, keys, "stream")?;
    validate_stream(stream).map_err(|reason| bad_value(&name, "stream", reason))?;

    let source = require(&name, keys, "source")?;
    let source = validate_source(source).map_err(|reason| bad_value(&name, "source", reason))?;

    let syslog_format = require(&name, keys, "syslog_format")?;
    validate_syslog_format(syslog_format)
        .map_err(|reason| bad_value(&name, "syslog_format", reason))?;

    let cloudwatch_format = require(&name, keys, "cloudwatch_format")?;
    validate_cloudwatch_format(cloudwatch_format)
        .map_err(|reason| bad_value(&name, "cloudwatch_format", reason))?;

    let upload_delay = match keys.get("upload_delay") {
        Some(value) => {
            validate_upload_delay(value).map_err(|reason| bad_value(&name, "upload_delay", reason))?
        }
        None => MIN_UPLOAD_DELAY_MS,
    };

    let queue_size = match keys.get("queue_size") {
        Some(value) => {
            validate_queue_size(value).map_err(|reason| bad_value(&name, "queue_size", reason))?
        }
        None => DEFAULT_QUEUE_SIZE,
    };

    Ok(FlowConfig {
        name,
        source,
        group: group.to_string(),
        stream: stream.to_string(),
        syslog_format: syslog_format.to_string(),
        cloudwatch_format: cloudwatch_format.to_string(),
        upload_delay: Duration::from_millis(upload_delay),
        queue_size,
    })
}

fn require<'a>(
    section: &str,
    keys: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, ConfigError> {
    keys.get(key)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
}

fn bad_value(section: &str, key: &str, reason: ValueError) -> ConfigError {
    ConfigError::BadValue {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

fn validate_choice(value: &str) -> ValueError {
    if value.is_empty() {
        ValueError::Empty
    } else {
        ValueError::Invalid
    }
}

/// Log group names: 1-512 chars of [A-Za-z0-9_./-].
/// See http://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_CreateLogGroup.html
fn validate_group(value: &str) -> Result<(), ValueError> {
    if value.is_empty() {
        return Err(ValueError::Empty);
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValueError::TooLong);
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || GROUP_NAME_CHARS.contains(c))
    {
        return Err(ValueError::Invalid);
    }
    Ok(())
}

/// Log stream names: 1-512 chars, ':' not allowed.
/// See http://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_CreateLogStream.html
fn validate_stream(value: &str) -> Result<(), ValueError> {
    if value.is_empty() {
        return Err(ValueError::Empty);
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValueError::TooLong);
    }
    if value.contains(':') {
        return Err(ValueError::Invalid);
    }
    Ok(())
}

fn validate_source(value: &str) -> Result<Url, ValueError> {
    let url = Url::parse(value).map_err(ValueError::BadUrl)?;
    if url.scheme() != "udp" {
        return Err(ValueError::InvalidScheme);
    }
    if url.host_str().is_none() || url.port().is_none() {
        return Err(ValueError::Invalid);
    }
    Ok(url)
}

fn validate_syslog_format(value: &str) -> Result<(), ValueError> {
    if value.is_empty() {
        return Err(ValueError::Empty);
    }
    if parser_for(value).is_none() {
        return Err(ValueError::UnknownFormat);
    }
    Ok(())
}

fn validate_cloudwatch_format(value: &str) -> Result<(), ValueError> {
    if value.is_empty() {
        return Err(ValueError::Empty);
    }
    let template = Template::parse(value).map_err(ValueError::BadTemplate)?;
    // Unknown field names only surface when rendering; probe one record so
    // they abort startup instead of dropping every event later.
    template
        .render(&probe_message())
        .map_err(ValueError::BadTemplate)?;
    Ok(())
}

fn validate_upload_delay(value: &str) -> Result<u64, ValueError> {
    let delay: u64 = value.parse().map_err(|_| ValueError::NotANumber)?;
    if delay < MIN_UPLOAD_DELAY_MS {
        return Err(ValueError::TooSmall);
    }
    Ok(delay)
}

fn validate_queue_size(value: &str) -> Result<usize, ValueError> {
    value.parse().map_err(|_| ValueError::NotANumber)
}

fn probe_message() -> SyslogMessage {
    SyslogMessage {
        facility: Facility(0),
        severity: Severity(0),
        timestamp: chrono::Utc::now(),
        hostname: String::new(),
        tag: String::new(),
        message: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn group_valid_chars() {
        assert_eq!(
            Ok(()),
            validate_group("_-/.abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789")
        );
    }

    #[test]
    fn group_too_long() {
        assert_eq!(Err(ValueError::TooLong), validate_group(&"a".repeat(518)));
    }

    #[test]
    fn group_empty() {
        assert_eq!(Err(ValueError::Empty), validate_group(""));
    }

    #[test]
    fn group_invalid_strings() {
        for value in [",", "|", "ą", ":"] {
            assert_eq!(Err(ValueError::Invalid), validate_group(value), "{value}");
        }
    }

    #[test]
    fn stream_rules() {
        assert_eq!(Ok(()), validate_stream("test-stream.1"));
        assert_eq!(Err(ValueError::Empty), validate_stream(""));
        assert_eq!(Err(ValueError::TooLong), validate_stream(&"a".repeat(518)));
        assert_eq!(Err(ValueError::Invalid), validate_stream("no:colons"));
    }

    #[test]
    fn source_rules() {
        assert!(validate_source("udp://localhost:5514").is_ok());
        assert_eq!(
            Err(ValueError::InvalidScheme),
            validate_source("tcp://localhost:5514")
        );
        assert_eq!(
            Err(ValueError::Invalid),
            validate_source("udp://localhost")
        );
        assert!(matches!(
            validate_source("not a url"),
            Err(ValueError::BadUrl(_))
        ));
    }

    #[test]
    fn syslog_format_rules() {
        assert_eq!(Ok(()), validate_syslog_format("RFC3164"));
        assert_eq!(Err(ValueError::Empty), validate_syslog_format(""));
        assert_eq!(
            Err(ValueError::UnknownFormat),
            validate_syslog_format("bad_format")
        );
    }

    #[test]
    fn cloudwatch_format_rules() {
        assert_eq!(Ok(()), validate_cloudwatch_format("{severity} {message}"));
        assert_eq!(Err(ValueError::Empty), validate_cloudwatch_format(""));
        assert_eq!(
            Err(ValueError::BadTemplate(RenderError::UnclosedField)),
            validate_cloudwatch_format("{message")
        );
        assert_eq!(
            Err(ValueError::BadTemplate(RenderError::UnknownField(
                "bogus".into()
            ))),
            validate_cloudwatch_format("{bogus}")
        );
    }

    #[test]
    fn upload_delay_rules() {
        assert_eq!(Ok(300), validate_upload_delay("300"));
        assert_eq!(Err(ValueError::TooSmall), validate_upload_delay("1"));
        assert_eq!(Err(ValueError::NotANumber), validate_upload_delay("soon"));
    }

    #[test]
    fn queue_size_rules() {
        assert_eq!(Ok(0), validate_queue_size("0"));
        assert_eq!(Err(ValueError::NotANumber), validate_queue_size("-1"));
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_full_file() {
        let file = write_config(
            "[main]\n\
             log_level = info\n\
             log_output = stderr\n\
             \n\
             [syslog]\n\
             group = Flow/Group\n\
             stream = instance-1\n\
             source = udp://localhost:5514\n\
             syslog_format = RFC3164\n\
             cloudwatch_format = {facility} {severity} {hostname} {tag} {message}\n\
             upload_delay = 500\n\
             queue_size = 100\n",
        );
        let cfg = load(file.path()).unwrap();
        assert_eq!(LogLevel::Info, cfg.main.log_level);
        assert_eq!(LogOutput::Stderr, cfg.main.log_output);
        assert_eq!(1, cfg.flows.len());

        let flow = &cfg.flows[0];
        assert_eq!("syslog", flow.name);
        assert_eq!("Flow/Group", flow.group);
        assert_eq!("instance-1", flow.stream);
        assert_eq!("udp", flow.source.scheme());
        assert_eq!(Duration::from_millis(500), flow.upload_delay);
        assert_eq!(100, flow.queue_size);
    }

    #[test]
    fn applies_flow_defaults() {
        let file = write_config(
            "[flow]\n\
             group = g\n\
             stream = s\n\
             source = udp://localhost:5514\n\
             syslog_format = RFC3164\n\
             cloudwatch_format = {message}\n",
        );
        let cfg = load(file.path()).unwrap();
        assert_eq!(LogLevel::Error, cfg.main.log_level);
        assert_eq!(LogOutput::Syslog, cfg.main.log_output);
        assert_eq!(Duration::from_millis(200), cfg.flows[0].upload_delay);
        assert_eq!(50_000, cfg.flows[0].queue_size);
    }

    #[test]
    fn missing_key_names_section_and_key() {
        let file = write_config(
            "[flow]\n\
             stream = s\n\
             source = udp://localhost:5514\n\
             syslog_format = RFC3164\n\
             cloudwatch_format = {message}\n",
        );
        let err = load(file.path()).unwrap_err();
        assert_eq!("missing key group in section flow", err.to_string());
    }

    #[test]
    fn bad_value_names_section_and_key() {
        let file = write_config(
            "[flow]\n\
             group = g\n\
             stream = s\n\
             source = tcp://localhost:5514\n\
             syslog_format = RFC3164\n\
             cloudwatch_format = {message}\n",
        );
        let err = load(file.path()).unwrap_err();
        assert_eq!(
            "bad value of source in section flow: invalid network scheme",
            err.to_string()
        );
    }

    #[test]
    fn flows_sorted_by_section_name() {
        let flow = |name: &str| {
            format!(
                "[{name}]\n\
                 group = g\n\
                 stream = s\n\
                 source = udp://localhost:5514\n\
                 syslog_format = RFC3164\n\
                 cloudwatch_format = {{message}}\n"
            )
        };
        let file = write_config(&format!("{}{}", flow("zeta"), flow("alpha")));
        let cfg = load(file.path()).unwrap();
        let names: Vec<&str> = cfg.flows.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(vec!["alpha", "zeta"], names);
    }
}
