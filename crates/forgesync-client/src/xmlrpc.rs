//! XML-RPC wire codec.
//!
//! Request:
//!
//!   <?xml version="1.0"?>
//!   <methodCall>
//!     <methodName>system.multicall</methodName>
//!     <params><param><value><array><data>
//!       <value><struct>
//!         <member><name>methodName</name><value><string>getTag</string></value></member>
//!         <member><name>params</name><value><array><data>...</data></array></value></member>
//!       </struct></value>
//!     </data></array></value></param></params>
//!   </methodCall>
//!
//! Response: `<methodResponse>` with either `<params>` (one value: an array
//! with one entry per call, each entry a single-element array on success or
//! a fault struct) or a top-level `<fault>`.
//!
//! Values map to JSON: struct ↔ object, array ↔ array, nil ↔ null.
//! `dateTime.iso8601` and `base64` decode as strings.

use crate::call::{CallDescriptor, CallOutcome};
use forgesync_core::{Error, Fault, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{json, Map, Value};

pub const MULTICALL_METHOD: &str = "system.multicall";

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a batch of calls as one `system.multicall` request.
pub fn encode_multicall(calls: &[CallDescriptor]) -> Result<String> {
    let entries: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "methodName": call.method,
                "params": Value::Array(call.wire_params()),
            })
        })
        .collect();
    encode_call(MULTICALL_METHOD, &[Value::Array(entries)])
}

/// Encode a single method call.
pub fn encode_call(method: &str, params: &[Value]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new("1.0", None, None)))
        .map_err(xml_error)?;
    start(&mut writer, "methodCall")?;
    text_element(&mut writer, "methodName", method)?;
    start(&mut writer, "params")?;
    for param in params {
        start(&mut writer, "param")?;
        write_value(&mut writer, param)?;
        end(&mut writer, "param")?;
    }
    end(&mut writer, "params")?;
    end(&mut writer, "methodCall")?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| Error::transport(format!("encoded request is not utf-8: {}", e)))
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<()> {
    start(writer, "value")?;
    match value {
        Value::Null => {
            writer
                .write_event(Event::Empty(BytesStart::new("nil")))
                .map_err(xml_error)?;
        }
        Value::Bool(b) => text_element(writer, "boolean", if *b { "1" } else { "0" })?,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                text_element(writer, "int", &i.to_string())?;
            } else {
                text_element(writer, "double", &n.to_string())?;
            }
        }
        Value::String(s) => text_element(writer, "string", s)?,
        Value::Array(items) => {
            start(writer, "array")?;
            start(writer, "data")?;
            for item in items {
                write_value(writer, item)?;
            }
            end(writer, "data")?;
            end(writer, "array")?;
        }
        Value::Object(map) => {
            start(writer, "struct")?;
            for (name, member) in map {
                start(writer, "member")?;
                text_element(writer, "name", name)?;
                write_value(writer, member)?;
                end(writer, "member")?;
            }
            end(writer, "struct")?;
        }
    }
    end(writer, "value")
}

fn start(writer: &mut Writer<Vec<u8>>, tag: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)
}

fn end(writer: &mut Writer<Vec<u8>>, tag: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)
}

fn text_element(writer: &mut Writer<Vec<u8>>, tag: &str, content: &str) -> Result<()> {
    start(writer, tag)?;
    writer
        .write_event(Event::Text(BytesText::new(content)))
        .map_err(xml_error)?;
    end(writer, tag)
}

fn xml_error(e: quick_xml::Error) -> Error {
    Error::transport(format!("xml write failed: {}", e))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A decoded `<methodResponse>`.
#[derive(Debug)]
pub enum Response {
    Success(Value),
    Fault(Fault),
}

/// Decode a `system.multicall` response into per-call outcomes.
///
/// A top-level fault means the whole batch failed; it is replicated into
/// every outcome so callers see a uniformly settled batch.
pub fn decode_multicall(xml: &str, expected: usize) -> Result<Vec<CallOutcome>> {
    let entries = match decode_response(xml)? {
        Response::Fault(fault) => return Ok(vec![Err(fault); expected]),
        Response::Success(Value::Array(entries)) => entries,
        Response::Success(other) => {
            return Err(Error::transport(format!(
                "multicall response is not an array: {}",
                other
            )))
        }
    };

    if entries.len() != expected {
        return Err(Error::transport(format!(
            "multicall response has {} results, expected {}",
            entries.len(),
            expected
        )));
    }

    Ok(entries.into_iter().map(decode_multicall_entry).collect())
}

fn decode_multicall_entry(entry: Value) -> CallOutcome {
    match entry {
        // success convention: a single-element array wrapping the value
        Value::Array(mut items) if items.len() == 1 => Ok(items.remove(0)),
        Value::Object(map) => Err(fault_from_struct(&map)),
        other => Err(Fault::transport(format!(
            "malformed multicall entry: {}",
            other
        ))),
    }
}

fn fault_from_struct(map: &Map<String, Value>) -> Fault {
    let code = map
        .get("faultCode")
        .and_then(Value::as_i64)
        .unwrap_or(-1) as i32;
    let message = map
        .get("faultString")
        .and_then(Value::as_str)
        .unwrap_or("unknown fault")
        .to_string();
    Fault::new(code, message)
}

/// Decode a single `<methodResponse>`.
pub fn decode_response(xml: &str) -> Result<Response> {
    let mut decoder = Decoder::new(xml);

    decoder.expect_start("methodResponse")?;
    match decoder.next()? {
        Event::Start(e) if e.name().as_ref() == b"params" => {
            decoder.expect_start("param")?;
            decoder.expect_start("value")?;
            let value = decoder.parse_value()?;
            Ok(Response::Success(value))
        }
        Event::Start(e) if e.name().as_ref() == b"fault" => {
            decoder.expect_start("value")?;
            let value = decoder.parse_value()?;
            match value {
                Value::Object(map) => Ok(Response::Fault(fault_from_struct(&map))),
                other => Err(Error::transport(format!(
                    "fault body is not a struct: {}",
                    other
                ))),
            }
        }
        other => Err(unexpected(&other, "params or fault")),
    }
}

struct Decoder<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        Self { reader }
    }

    /// Next meaningful event: declarations, comments, and processing
    /// instructions are skipped.
    fn next(&mut self) -> Result<Event<'a>> {
        loop {
            match self
                .reader
                .read_event()
                .map_err(|e| Error::transport(format!("xml parse failed: {}", e)))?
            {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => continue,
                event => return Ok(event),
            }
        }
    }

    fn expect_start(&mut self, tag: &str) -> Result<()> {
        match self.next()? {
            Event::Start(e) if e.name().as_ref() == tag.as_bytes() => Ok(()),
            other => Err(unexpected(&other, tag)),
        }
    }

    fn expect_end(&mut self, tag: &str) -> Result<()> {
        match self.next()? {
            Event::End(e) if e.name().as_ref() == tag.as_bytes() => Ok(()),
            other => Err(unexpected(&other, &format!("</{}>", tag))),
        }
    }

    /// Accumulate text content up to the closing tag.
    fn read_text_until(&mut self, tag: &str) -> Result<String> {
        let mut content = String::new();
        loop {
            match self.next()? {
                Event::Text(t) => content.push_str(
                    &t.unescape()
                        .map_err(|e| Error::transport(format!("xml unescape failed: {}", e)))?,
                ),
                Event::CData(c) => {
                    content.push_str(&String::from_utf8_lossy(&c));
                }
                Event::End(e) if e.name().as_ref() == tag.as_bytes() => return Ok(content),
                other => return Err(unexpected(&other, &format!("text or </{}>", tag))),
            }
        }
    }

    /// Parse one `<value>`; the caller has consumed the opening tag.
    fn parse_value(&mut self) -> Result<Value> {
        match self.next()? {
            // bare text inside <value> is a string
            Event::Text(t) => {
                let s = t
                    .unescape()
                    .map_err(|e| Error::transport(format!("xml unescape failed: {}", e)))?
                    .into_owned();
                self.expect_end("value")?;
                Ok(Value::String(s))
            }
            Event::End(e) if e.name().as_ref() == b"value" => Ok(Value::String(String::new())),
            Event::Empty(e) if e.name().as_ref() == b"nil" => {
                self.expect_end("value")?;
                Ok(Value::Null)
            }
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let value = match tag.as_str() {
                    "string" | "base64" | "dateTime.iso8601" => {
                        Value::String(self.read_text_until(&tag)?)
                    }
                    "int" | "i4" | "i8" => {
                        let text = self.read_text_until(&tag)?;
                        let n: i64 = text.trim().parse().map_err(|_| {
                            Error::transport(format!("bad integer in response: `{}`", text))
                        })?;
                        Value::from(n)
                    }
                    "boolean" => {
                        let text = self.read_text_until(&tag)?;
                        Value::Bool(matches!(text.trim(), "1" | "true"))
                    }
                    "double" => {
                        let text = self.read_text_until(&tag)?;
                        let n: f64 = text.trim().parse().map_err(|_| {
                            Error::transport(format!("bad double in response: `{}`", text))
                        })?;
                        serde_json::Number::from_f64(n)
                            .map(Value::Number)
                            .ok_or_else(|| {
                                Error::transport(format!("non-finite double in response: {}", n))
                            })?
                    }
                    "nil" => {
                        self.expect_end("nil")?;
                        Value::Null
                    }
                    "array" => self.parse_array()?,
                    "struct" => self.parse_struct()?,
                    other => {
                        return Err(Error::transport(format!(
                            "unsupported value type <{}>",
                            other
                        )))
                    }
                };
                self.expect_end("value")?;
                Ok(value)
            }
            other => Err(unexpected(&other, "value content")),
        }
    }

    /// Parse `<array>` content; consumes through `</array>`.
    fn parse_array(&mut self) -> Result<Value> {
        self.expect_start("data")?;
        let mut items = Vec::new();
        loop {
            match self.next()? {
                Event::Start(e) if e.name().as_ref() == b"value" => {
                    items.push(self.parse_value()?)
                }
                Event::End(e) if e.name().as_ref() == b"data" => break,
                other => return Err(unexpected(&other, "<value> or </data>")),
            }
        }
        self.expect_end("array")?;
        Ok(Value::Array(items))
    }

    /// Parse `<struct>` content; consumes through `</struct>`.
    fn parse_struct(&mut self) -> Result<Value> {
        let mut map = Map::new();
        loop {
            match self.next()? {
                Event::Start(e) if e.name().as_ref() == b"member" => {
                    self.expect_start("name")?;
                    let name = self.read_text_until("name")?;
                    self.expect_start("value")?;
                    let value = self.parse_value()?;
                    self.expect_end("member")?;
                    map.insert(name, value);
                }
                Event::End(e) if e.name().as_ref() == b"struct" => break,
                other => return Err(unexpected(&other, "<member> or </struct>")),
            }
        }
        Ok(Value::Object(map))
    }
}

fn unexpected(event: &Event<'_>, wanted: &str) -> Error {
    Error::transport(format!("unexpected xml event {:?}, wanted {}", event, wanted))
}
