use thiserror::Error;

use super::models::SyslogMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unclosed field reference")]
    UnclosedField,
    #[error("unknown field {0:?}")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// An outbound line template. Field references are written `{name}`; the
/// known fields are `facility`, `severity`, `timestamp`, `hostname`, `tag`
/// and `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse the template syntax. Field names are resolved at render time.
    pub fn parse(input: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let close = rest[open..].find('}').ok_or(RenderError::UnclosedField)?;
            segments.push(Segment::Field(rest[open + 1..open + close].to_string()));
            rest = &rest[open + close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Template { segments })
    }

    /// Render a record into a fresh output buffer.
    pub fn render(&self, message: &SyslogMessage) -> Result<String, RenderError> {
        let mut out = String::with_capacity(message.message.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match name.as_str() {
                    "facility" => out.push_str(&message.facility.to_string()),
                    "severity" => out.push_str(&message.severity.to_string()),
                    "timestamp" => out.push_str(&message.timestamp.to_rfc3339()),
                    "hostname" => out.push_str(&message.hostname),
                    "tag" => out.push_str(&message.tag),
                    "message" => out.push_str(&message.message),
                    _ => return Err(RenderError::UnknownField(name.clone())),
                },
            }
        }
        Ok(out)
    }
}
