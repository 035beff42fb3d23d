//! Template definitions.
//!
//! A template is a named macro: a tera body (inline `content` or an external
//! `file`), an optional defaults map merged under each call's payload, and
//! an optional JSON-Schema for the merged payload. Rendering produces YAML
//! text that is parsed through the same document path as files, so template
//! output may contain further template calls and `multi` documents.

use forgesync_core::{Error, Origin, Result, TraceFrame};
use forgesync_model::Document;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub struct Template {
    pub name: String,
    pub origin: Origin,
    defaults: Map<String, Value>,
    schema: Option<jsonschema::Validator>,
    engine: tera::Tera,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("defaults", &self.defaults)
            .field("has_schema", &self.schema.is_some())
            .finish()
    }
}

impl Template {
    pub fn from_document(doc: &Document) -> Result<Template> {
        let name = doc.require_name()?.to_string();

        let inline = doc.data.get("content").and_then(Value::as_str);
        let file = doc.data.get("file").and_then(Value::as_str);
        let body = match (inline, file) {
            (Some(content), None) => content.to_string(),
            (None, Some(file)) => {
                let path = resolve_body_path(&doc.origin.file, file);
                std::fs::read_to_string(&path).map_err(|e| {
                    Error::validation(
                        &doc.origin,
                        "file",
                        format!("cannot read template body {}: {}", path.display(), e),
                    )
                })?
            }
            (Some(_), Some(_)) => {
                return Err(Error::validation(
                    &doc.origin,
                    "content",
                    "template declares both `content` and `file`",
                ))
            }
            (None, None) => {
                return Err(Error::validation(
                    &doc.origin,
                    "content",
                    "template declares neither `content` nor `file`",
                ))
            }
        };

        let defaults = doc
            .data
            .get("defaults")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let schema = match doc.data.get("schema") {
            Some(schema) => Some(jsonschema::validator_for(schema).map_err(|e| {
                Error::validation(&doc.origin, "schema", format!("invalid schema: {}", e))
            })?),
            None => None,
        };

        let mut engine = tera::Tera::default();
        engine
            .add_raw_template(&name, &body)
            .map_err(|e| Error::TemplateSyntax {
                template: name.clone(),
                message: render_tera_error(&e),
                source: Some(Box::new(e)),
            })?;

        Ok(Template {
            name,
            origin: doc.origin.clone(),
            defaults,
            schema,
            engine,
        })
    }

    /// Expand one call: merge defaults under the call data, validate the
    /// merged payload, render, and parse the output into documents whose
    /// traces extend the caller's.
    pub fn expand(&self, call_data: &Map<String, Value>, caller: &Origin) -> Result<Vec<Document>> {
        let mut merged = self.defaults.clone();
        for (k, v) in call_data {
            merged.insert(k.clone(), v.clone());
        }
        let merged = Value::Object(merged);

        if let Some(schema) = &self.schema {
            if let Some(error) = schema.iter_errors(&merged).next() {
                return Err(Error::Validation {
                    origin: caller.clone(),
                    field: error.instance_path.to_string(),
                    message: error.to_string(),
                });
            }
        }

        let context = tera::Context::from_value(merged).map_err(|e| Error::TemplateRender {
            template: self.name.clone(),
            origin: caller.clone(),
            message: render_tera_error(&e),
            source: Some(Box::new(e)),
        })?;
        let rendered =
            self.engine
                .render(&self.name, &context)
                .map_err(|e| Error::TemplateRender {
                    template: self.name.clone(),
                    origin: caller.clone(),
                    message: render_tera_error(&e),
                    source: Some(Box::new(e)),
                })?;

        let produced = forgesync_model::parse_documents(&rendered, &self.origin.file).map_err(
            |e| Error::TemplateOutput {
                template: self.name.clone(),
                origin: caller.clone(),
                source: Box::new(e),
            },
        )?;

        let frame = TraceFrame {
            template: self.name.clone(),
            file: self.origin.file.clone(),
            line: self.origin.line,
        };
        Ok(produced
            .into_iter()
            .map(|mut doc| {
                doc.origin = caller.expanded_through(
                    frame.clone(),
                    doc.origin.file.clone(),
                    doc.origin.line,
                );
                doc
            })
            .collect())
    }
}

fn resolve_body_path(declaring_file: &Path, body: &str) -> PathBuf {
    let body = Path::new(body);
    if body.is_absolute() {
        body.to_path_buf()
    } else {
        declaring_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(body)
    }
}

/// Tera buries the useful message in the source chain; flatten it.
fn render_tera_error(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgesync_model::parse_documents;

    fn template_from(yaml: &str) -> Template {
        let docs = parse_documents(yaml, Path::new("templates.yaml")).unwrap();
        Template::from_document(&docs[0]).unwrap()
    }

    #[test]
    fn defaults_merge_under_call_data() {
        let template = template_from(
            "type: template\n\
             name: build-tag\n\
             defaults:\n\
             \x20 arches: [x86_64]\n\
             content: |\n\
             \x20 type: tag\n\
             \x20 name: {{ name }}-build\n\
             \x20 arches: [{% for a in arches %}{{ a }}{% if not loop.last %}, {% endif %}{% endfor %}]\n",
        );

        let mut call = Map::new();
        call.insert("name".into(), Value::String("f42".into()));
        let caller = Origin::new("site.yaml", 3);
        let docs = template.expand(&call, &caller).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "tag");
        assert_eq!(docs[0].name(), Some("f42-build"));
        assert_eq!(docs[0].data["arches"], serde_json::json!(["x86_64"]));
        // trace has exactly one entry, naming this template
        assert_eq!(docs[0].origin.depth(), 1);
        assert_eq!(docs[0].origin.trace[0].template, "build-tag");
    }

    #[test]
    fn call_data_wins_over_defaults() {
        let template = template_from(
            "type: template\n\
             name: t\n\
             defaults:\n\
             \x20 flavor: release\n\
             content: |\n\
             \x20 type: tag\n\
             \x20 name: {{ name }}-{{ flavor }}\n",
        );
        let mut call = Map::new();
        call.insert("name".into(), Value::String("a".into()));
        call.insert("flavor".into(), Value::String("debug".into()));
        let docs = template.expand(&call, &Origin::new("site.yaml", 1)).unwrap();
        assert_eq!(docs[0].name(), Some("a-debug"));
    }

    #[test]
    fn schema_failure_carries_field_path() {
        let template = template_from(
            "type: template\n\
             name: t\n\
             schema:\n\
             \x20 type: object\n\
             \x20 required: [name]\n\
             \x20 properties:\n\
             \x20   name: {type: string}\n\
             content: |\n\
             \x20 type: tag\n\
             \x20 name: {{ name }}\n",
        );
        let err = template
            .expand(&Map::new(), &Origin::new("site.yaml", 9))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn bad_template_syntax_is_rejected_at_ingest() {
        let docs = parse_documents(
            "type: template\nname: broken\ncontent: '{% if %}'\n",
            Path::new("templates.yaml"),
        )
        .unwrap();
        let err = Template::from_document(&docs[0]).unwrap_err();
        assert!(matches!(err, Error::TemplateSyntax { .. }));
    }

    #[test]
    fn invalid_output_is_a_template_output_error() {
        let template = template_from(
            "type: template\nname: t\ncontent: |\n\x20 name: no-type-field\n",
        );
        let err = template
            .expand(&Map::new(), &Origin::new("site.yaml", 1))
            .unwrap_err();
        assert!(matches!(err, Error::TemplateOutput { .. }));
    }
}
