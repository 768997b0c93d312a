//! Content-type aware encoders.
//!
//! Every render answers two questions: which `Content-Type` it produces, and
//! how a [`Payload`] becomes body bytes. [`Context`](crate::Context) picks
//! one (explicitly, or by negotiating against `Accept`) and drives it through
//! [`Context::render`](crate::Context::render).
//!
//! | Render | Content-Type | Encoding |
//! |---|---|---|
//! | [`DefaultRender`] | current type, else `text/plain` | follows the current type |
//! | [`JsonRender`] | `application/json` | JSON |
//! | [`JsonpRender`] | `application/javascript` | `callback(<json>)` |
//! | [`XmlRender`] | `text/xml` | XML |
//! | [`TextRender`] | `text/plain` | human-readable text |
//! | [`HashRender`] | inner render's | inner encoding + `ETag` digest |

mod hash;

use http::header::CONTENT_TYPE;
use serde::Serialize;

use crate::error::Error;
use crate::payload::Payload;
use crate::response::BodyWriter;

pub use hash::{HashRender, Hasher};

pub const CONTENT_TYPE_DEFAULT: &str = "text/plain";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_JSONP: &str = "application/javascript";
pub const CONTENT_TYPE_XML: &str = "text/xml";

/// A serializer bound to a content type.
pub trait Render {
    /// The `Content-Type` this render produces. `current` is the type already
    /// set on the response, if any. Must not have side effects.
    fn content_type<'a>(&'a self, current: Option<&'a str>) -> &'a str;

    /// Writes exactly one body for `data`.
    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error>;
}

// ── Default ──────────────────────────────────────────────────────────────────

/// Copies byte streams verbatim, otherwise encodes according to the
/// `Content-Type` already present on the response.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRender;

impl Render for DefaultRender {
    fn content_type<'a>(&'a self, current: Option<&'a str>) -> &'a str {
        current.unwrap_or(CONTENT_TYPE_DEFAULT)
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        if let Some(producer) = data.as_byte_producer() {
            w.write_all(producer.bytes())?;
            return Ok(());
        }

        let current = w
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let body = if current.contains(CONTENT_TYPE_JSON) {
            encode_json(data)?
        } else if current.contains("/xml") {
            encode_xml(data)?.into_bytes()
        } else {
            stringify(data)?.into_bytes()
        };
        w.write_all(&body)?;
        Ok(())
    }
}

// ── Fixed encodings ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRender;

impl Render for JsonRender {
    fn content_type<'a>(&'a self, _: Option<&'a str>) -> &'a str {
        CONTENT_TYPE_JSON
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        w.write_all(&encode_json(data)?)?;
        Ok(())
    }
}

/// JSON wrapped in a call to `callback`.
#[derive(Debug, Clone)]
pub struct JsonpRender {
    callback: String,
}

impl JsonpRender {
    pub fn new(callback: impl Into<String>) -> Self {
        Self { callback: callback.into() }
    }
}

impl Render for JsonpRender {
    fn content_type<'a>(&'a self, _: Option<&'a str>) -> &'a str {
        CONTENT_TYPE_JSONP
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        let json = encode_json(data)?;

        let mut body = Vec::with_capacity(self.callback.len() + json.len() + 2);
        body.extend_from_slice(self.callback.as_bytes());
        body.push(b'(');
        body.extend_from_slice(&json);
        body.push(b')');

        w.write_all(&body)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XmlRender;

impl Render for XmlRender {
    fn content_type<'a>(&'a self, _: Option<&'a str>) -> &'a str {
        CONTENT_TYPE_XML
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        w.write_all(encode_xml(data)?.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextRender;

impl Render for TextRender {
    fn content_type<'a>(&'a self, _: Option<&'a str>) -> &'a str {
        CONTENT_TYPE_DEFAULT
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        match data.as_byte_producer() {
            Some(producer) => w.write_all(producer.bytes())?,
            None => w.write_all(stringify(data)?.as_bytes())?,
        }
        Ok(())
    }
}

// ── Negotiation ──────────────────────────────────────────────────────────────

/// The render picked by [`negotiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    Json,
    Xml,
    Default,
}

/// Picks a render from an `Accept` header value.
///
/// Entries are checked in the order the client sent them; the first one
/// mentioning a JSON or XML type wins. Quality values are not weighed.
pub fn negotiate(accept: &str) -> Negotiated {
    accept
        .split(',')
        .find_map(|entry| {
            if entry.contains(CONTENT_TYPE_JSON) || entry.contains(CONTENT_TYPE_JSONP) {
                Some(Negotiated::Json)
            } else if entry.contains(CONTENT_TYPE_XML) {
                Some(Negotiated::Xml)
            } else {
                None
            }
        })
        .unwrap_or(Negotiated::Default)
}

impl Render for Negotiated {
    fn content_type<'a>(&'a self, current: Option<&'a str>) -> &'a str {
        match self {
            Self::Json => JsonRender.content_type(current),
            Self::Xml => XmlRender.content_type(current),
            Self::Default => DefaultRender.content_type(current),
        }
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        match self {
            Self::Json => JsonRender.render(w, data),
            Self::Xml => XmlRender.render(w, data),
            Self::Default => DefaultRender.render(w, data),
        }
    }
}

// ── Encoders ─────────────────────────────────────────────────────────────────

fn encode_json<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(data).map_err(|e| Error::encode("json", e))
}

/// Root element for payloads without a name of their own: strings,
/// numbers, maps and sequences.
const XML_ROOT: &str = "response";

/// Holds a sequence so its elements become `<item>` children of the root.
#[derive(Serialize)]
struct XmlItems<'a, T: ?Sized> {
    item: &'a T,
}

/// Structs are rooted at their own name. Anything quick-xml cannot root by
/// itself is wrapped in [`XML_ROOT`].
fn encode_xml<T: Serialize + ?Sized>(data: &T) -> Result<String, Error> {
    if let Ok(xml) = quick_xml::se::to_string(data) {
        return Ok(xml);
    }

    let is_sequence = matches!(serde_json::to_value(data), Ok(serde_json::Value::Array(_)));
    let encoded = if is_sequence {
        quick_xml::se::to_string_with_root(XML_ROOT, &XmlItems { item: data })
    } else {
        quick_xml::se::to_string_with_root(XML_ROOT, data)
    };
    encoded.map_err(|e| Error::encode("xml", e))
}

/// Human-readable text: strings verbatim, scalars as written, compound
/// values as compact JSON.
fn stringify<T: Serialize + ?Sized>(data: &T) -> Result<String, Error> {
    let value = serde_json::to_value(data).map_err(|e| Error::encode("text", e))?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
