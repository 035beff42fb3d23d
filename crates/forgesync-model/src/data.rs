//! Configuration documents.
//!
//! A document is one mapping out of a YAML stream, with its `type` split off,
//! reserved fields stripped, and an origin attached. The `multi` type fans a
//! single document out into many. Template *output* goes through the same
//! parsing path as files, so templates may emit `multi` documents too.

use forgesync_core::{Error, Origin, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// Field names beginning with `_` or `x-` are reserved: ignored by the
/// model, available as shared anchors for the reference mechanism.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with("x-")
}

/// One configuration document, ready for the namespace.
#[derive(Clone, Debug)]
pub struct Document {
    pub doc_type: String,
    /// The document body minus `type` and reserved fields.
    pub data: Map<String, Value>,
    pub origin: Origin,
}

impl Document {
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    pub fn require_name(&self) -> Result<&str> {
        self.name()
            .ok_or_else(|| Error::validation(&self.origin, "name", "missing required field"))
    }

    /// The document as one renderable value, `type` first.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.doc_type.clone()));
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }
}

/// Parse a YAML stream into documents: split on `---`, attach per-document
/// line origins, expand `multi` documents, strip reserved fields.
pub fn parse_documents(text: &str, file: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for (start_line, chunk) in split_stream(text) {
        let chunk: &str = &chunk;
        if chunk.lines().all(|l| {
            let t = l.trim();
            t.is_empty() || t.starts_with('#')
        }) {
            continue;
        }
        let value: serde_yaml::Value = serde_yaml::from_str(chunk).map_err(|e| {
            let line = start_line + e.location().map(|l| l.line().saturating_sub(1)).unwrap_or(0);
            Error::document_parse(file, line, e.to_string())
        })?;
        if matches!(value, serde_yaml::Value::Null) {
            continue;
        }

        let line = start_line + first_content_line(chunk);
        let origin = Origin::new(file, line);
        let mapping = match value {
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(Error::document_parse(
                    file,
                    line,
                    "document is not a mapping",
                ))
            }
        };

        let doc = document_from_mapping(mapping, origin, None)?;
        if doc.doc_type == "multi" {
            expand_multi(doc, &mut documents)?;
        } else {
            documents.push(doc);
        }
    }

    Ok(documents)
}

/// Split a YAML stream into `(start line, chunk)` pairs. Lines holding only
/// `---` separate documents; `...` ends one.
fn split_stream(text: &str) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut start = 1;

    let mut flush = |start: usize, current: &mut String| {
        if !current.trim().is_empty() {
            chunks.push((start, std::mem::take(current)));
        } else {
            current.clear();
        }
    };

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            flush(start, &mut current);
            start = idx + 2;
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(start, &mut current);

    chunks
}

/// Offset of the first non-blank, non-comment line within a chunk.
fn first_content_line(chunk: &str) -> usize {
    chunk
        .lines()
        .position(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .unwrap_or(0)
}

/// Build a `Document` from a YAML mapping: require `type`, strip reserved
/// fields, default `name` when the caller provides one.
fn document_from_mapping(
    mapping: serde_yaml::Mapping,
    origin: Origin,
    default_name: Option<&str>,
) -> Result<Document> {
    let mut doc_type = None;
    let mut data = Map::new();

    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            other => {
                return Err(Error::document_parse(
                    &origin.file,
                    origin.line,
                    format!("non-string field name: {:?}", other),
                ))
            }
        };
        if is_reserved_key(&key) {
            continue;
        }
        if key == "type" {
            match value {
                serde_yaml::Value::String(s) => doc_type = Some(s),
                _ => {
                    return Err(Error::document_parse(
                        &origin.file,
                        origin.line,
                        "field `type` is not a string",
                    ))
                }
            }
            continue;
        }
        data.insert(key, yaml_to_json(value, &origin)?);
    }

    let doc_type = doc_type.ok_or_else(|| {
        Error::document_parse(&origin.file, origin.line, "missing required field `type`")
    })?;

    if let Some(name) = default_name {
        data.entry("name".to_string())
            .or_insert_with(|| Value::String(name.to_string()));
    }

    Ok(Document {
        doc_type,
        data,
        origin,
    })
}

/// Expand a `multi` document: every non-reserved entry whose value is a
/// mapping becomes its own document, keyed entry names becoming `name`.
fn expand_multi(doc: Document, out: &mut Vec<Document>) -> Result<()> {
    for (key, value) in doc.data {
        if is_reserved_key(&key) {
            continue;
        }
        let Value::Object(body) = value else {
            tracing::debug!(entry = %key, origin = %doc.origin, "multi entry is not a mapping, ignored");
            continue;
        };
        let mapping = json_map_to_yaml(body);
        out.push(document_from_mapping(
            mapping,
            doc.origin.clone(),
            Some(&key),
        )?);
    }
    Ok(())
}

fn json_map_to_yaml(map: Map<String, Value>) -> serde_yaml::Mapping {
    let mut mapping = serde_yaml::Mapping::new();
    for (k, v) in map {
        mapping.insert(
            serde_yaml::Value::String(k),
            serde_yaml::to_value(v).unwrap_or(serde_yaml::Value::Null),
        );
    }
    mapping
}

fn yaml_to_json(value: serde_yaml::Value, origin: &Origin) -> Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        Error::document_parse(
                            &origin.file,
                            origin.line,
                            format!("non-finite number: {}", f),
                        )
                    })?
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(|item| yaml_to_json(item, origin))
                .collect::<Result<_>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => {
                        return Err(Error::document_parse(
                            &origin.file,
                            origin.line,
                            format!("non-string mapping key: {:?}", other),
                        ))
                    }
                };
                map.insert(key, yaml_to_json(v, origin)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value, origin)?,
    })
}
