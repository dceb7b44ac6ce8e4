//! Payload classification by declared content type
//!
//! Classification is pure: no I/O, no shared state, safe to call from any
//! number of request handlers at once.

use crate::config::UndeclaredContentType;
use crate::types::StreamTag;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use thiserror::Error;

/// Why a payload was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Declared JSON that does not parse
    #[error("Malformed JSON payload")]
    MalformedJson,
    /// Declared XML that is not well-formed
    #[error("Malformed XML payload")]
    MalformedXml,
    /// Content type outside the supported set
    #[error("Unsupported Content-Type: {0}")]
    UnsupportedContentType(String),
    /// No content type while the server is configured to require one
    #[error("Missing Content-Type")]
    MissingContentType,
}

impl Rejection {
    /// Short machine-readable reason, used as a metrics label
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MalformedJson => "malformed_json",
            Rejection::MalformedXml => "malformed_xml",
            Rejection::UnsupportedContentType(_) => "unsupported_content_type",
            Rejection::MissingContentType => "missing_content_type",
        }
    }
}

/// Format named by a content type header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredFormat {
    /// One of the JSON media types
    Json,
    /// One of the XML media types
    Xml,
    /// `text/plain`
    Text,
    /// Anything else, carrying the normalised media type
    Unsupported(String),
}

impl DeclaredFormat {
    /// Map a `Content-Type` value to a format, ignoring parameters such as `charset`
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" | "text/json" | "application/cee+json" => DeclaredFormat::Json,
            "application/xml" | "text/xml" | "application/cee+xml" => DeclaredFormat::Xml,
            "text/plain" => DeclaredFormat::Text,
            other if other.contains('/') && other.ends_with("+json") => DeclaredFormat::Json,
            other if other.contains('/') && other.ends_with("+xml") => DeclaredFormat::Xml,
            _ => DeclaredFormat::Unsupported(essence),
        }
    }
}

/// Decide which stream a payload belongs to.
///
/// A declared JSON or XML type is validated against that grammar only; a
/// payload declared as JSON is never accepted as XML and vice versa.
pub fn classify(
    payload: &str,
    content_type: Option<&str>,
    undeclared: UndeclaredContentType,
) -> Result<StreamTag, Rejection> {
    let Some(content_type) = content_type else {
        return match undeclared {
            UndeclaredContentType::Sniff => Ok(sniff(payload)),
            UndeclaredContentType::Text => Ok(StreamTag::Text),
            UndeclaredContentType::Reject => Err(Rejection::MissingContentType),
        };
    };

    match DeclaredFormat::from_content_type(content_type) {
        DeclaredFormat::Json if is_valid_json(payload) => Ok(StreamTag::Json),
        DeclaredFormat::Json => Err(Rejection::MalformedJson),
        DeclaredFormat::Xml if is_well_formed_xml(payload) => Ok(StreamTag::Xml),
        DeclaredFormat::Xml => Err(Rejection::MalformedXml),
        DeclaredFormat::Text => Ok(StreamTag::Text),
        DeclaredFormat::Unsupported(essence) => Err(Rejection::UnsupportedContentType(essence)),
    }
}

/// JSON first, then XML, anything else is text
pub fn sniff(payload: &str) -> StreamTag {
    if is_valid_json(payload) {
        StreamTag::Json
    } else if is_well_formed_xml(payload) {
        StreamTag::Xml
    } else {
        StreamTag::Text
    }
}

/// Whether the payload is exactly one JSON document
pub fn is_valid_json(payload: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(payload).is_ok()
}

/// Whether the payload is a well-formed XML document with a single root element
pub fn is_well_formed_xml(payload: &str) -> bool {
    let mut reader = Reader::from_str(payload);
    reader.config_mut().check_end_names = true;

    let mut depth: usize = 0;
    let mut roots: usize = 0;
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(element)) => {
                if !is_well_formed_element(&element) {
                    return false;
                }
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(XmlEvent::End(_)) => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Ok(XmlEvent::Empty(element)) => {
                if !is_well_formed_element(&element) {
                    return false;
                }
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(XmlEvent::Text(text)) => {
                if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) {
                    return false;
                }
                if text.unescape().is_err() {
                    return false;
                }
            }
            Ok(XmlEvent::CData(_)) if depth == 0 => return false,
            // The prolog ends at the first element.
            Ok(XmlEvent::DocType(_)) if roots > 0 || depth > 0 => return false,
            Ok(XmlEvent::Eof) => return depth == 0 && roots == 1,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

/// Element name must start with a name-start character; attributes must be
/// quoted, unique and carry only known entity references.
fn is_well_formed_element(element: &BytesStart<'_>) -> bool {
    let is_name_start = |b: u8| b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x80;
    if !element.name().as_ref().first().is_some_and(|&b| is_name_start(b)) {
        return false;
    }

    let mut attributes = element.attributes();
    attributes.with_checks(true);
    attributes.all(|attribute| {
        attribute.is_ok_and(|attribute| attribute.unescape_value().is_ok())
    })
}
