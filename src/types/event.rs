//! Event and stream types

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Logical stream an event is persisted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    /// JSON payloads (`application/json`, `application/cee+json`)
    Json,
    /// XML payloads (`application/xml`, `text/xml`, `application/cee+xml`)
    Xml,
    /// Plain text payloads
    Text,
}

impl StreamTag {
    /// Every stream, in registry order
    pub const ALL: [StreamTag; 3] = [StreamTag::Json, StreamTag::Xml, StreamTag::Text];

    /// Stream name used for file names and log fields
    pub fn name(self) -> &'static str {
        match self {
            StreamTag::Json => "json",
            StreamTag::Xml => "xml",
            StreamTag::Text => "text",
        }
    }

    /// Human-facing label used in acknowledgements
    pub fn label(self) -> &'static str {
        match self {
            StreamTag::Json => "JSON",
            StreamTag::Xml => "XML",
            StreamTag::Text => "Text",
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A received event, alive only for the duration of its request
#[derive(Debug, Clone)]
pub struct Event {
    /// Stream the event was classified into
    pub tag: StreamTag,

    /// Decoded payload
    pub payload: String,

    /// Receipt time
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Create an event received now
    pub fn new(tag: StreamTag, payload: impl Into<String>) -> Self {
        Self {
            tag,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Render as a single newline-terminated record.
    ///
    /// Line breaks inside the payload become spaces so that one event is
    /// always exactly one line in the stream file.
    pub fn to_record_line(&self) -> String {
        let timestamp = self
            .received_at
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let payload = self.payload.trim_end_matches(['\r', '\n']);

        let mut line = String::with_capacity(timestamp.len() + payload.len() + 2);
        line.push_str(&timestamp);
        line.push(' ');
        let mut chars = payload.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    line.push(' ');
                }
                '\n' => line.push(' '),
                other => line.push(other),
            }
        }
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_line_is_single_line() {
        let event = Event::new(StreamTag::Json, "{\r\n  \"a\": 1,\n  \"b\": 2\n}\n");
        let line = event.to_record_line();

        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with("{   \"a\": 1,   \"b\": 2 }\n"));
    }

    #[test]
    fn record_line_starts_with_timestamp() {
        let event = Event::new(StreamTag::Text, "hello");
        let line = event.to_record_line();
        let (timestamp, rest) = line.split_once(' ').unwrap();

        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(rest, "hello\n");
    }

    #[test]
    fn stream_names_and_labels() {
        let names: Vec<_> = StreamTag::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["json", "xml", "text"]);
        assert_eq!(StreamTag::Xml.label(), "XML");
        assert_eq!(StreamTag::Text.to_string(), "text");
    }
}
