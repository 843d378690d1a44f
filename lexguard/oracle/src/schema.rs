use std::{fmt, sync::Arc};

use jsonschema::Validator;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// Response contract for one oracle task.
///
/// The JSON Schema is generated from the type the answer deserialises into,
/// rendered into the prompt, and enforced with a compiled validator. Before
/// validation, enum spellings are canonicalised (case, spaces and hyphens are
/// ignored, registered aliases are mapped) and `null` optional fields are
/// removed.
#[derive(Clone)]
pub struct ResponseSchema {
    name: String,
    document: Arc<Value>,
    validator: Result<Arc<Validator>, String>,
    aliases: Vec<(String, String)>,
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("name", &self.name)
            .field("compiled", &self.validator.is_ok())
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl ResponseSchema {
    /// Contract named `name` for answers shaped like `T`.
    #[must_use]
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Self {
        let document = Value::from(schema_for!(T));
        let validator = jsonschema::validator_for(&document)
            .map(Arc::new)
            .map_err(|err| err.to_string());
        Self {
            name: name.into(),
            document: Arc::new(document),
            validator,
            aliases: Vec::new(),
        }
    }

    /// Accepts `alias` wherever an enum allows `canonical`.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), canonical.into()));
        self
    }

    /// Contract name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generated JSON Schema.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Schema text embedded in prompts.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{:#}", self.document)
    }

    /// Fails when the generated schema could not be compiled.
    pub fn ready(&self) -> Result<(), String> {
        self.validator.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    /// Canonicalises `value` in place, then validates it.
    pub fn validate(&self, value: &mut Value) -> Result<(), Vec<SchemaViolation>> {
        let validator = self.validator.as_ref().map_err(|reason| {
            vec![SchemaViolation::new("$", format!("contract does not compile: {reason}"))]
        })?;
        self.canonicalise(&self.document, value);
        let violations: Vec<SchemaViolation> = validator
            .iter_errors(value)
            .map(|err| SchemaViolation::new(&format!("${}", err.instance_path), err.to_string()))
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn canonicalise(&self, node: &Value, value: &mut Value) {
        let mut shapes = Vec::new();
        self.shapes(node, &mut shapes);
        match value {
            Value::String(raw) => {
                if let Some(canonical) = self.canonical(raw, &enum_values(&shapes)) {
                    *raw = canonical;
                }
            }
            Value::Array(items) => {
                for item_schema in shapes.iter().filter_map(|shape| shape.get("items")) {
                    for item in items.iter_mut() {
                        self.canonicalise(item_schema, item);
                    }
                }
            }
            Value::Object(fields) => {
                for shape in &shapes {
                    let Some(Value::Object(properties)) = shape.get("properties") else {
                        continue;
                    };
                    let required = shape.get("required").and_then(Value::as_array);
                    for (key, property) in properties {
                        let is_required = required.is_some_and(|names| {
                            names.iter().any(|name| name.as_str() == Some(key.as_str()))
                        });
                        if !is_required && fields.get(key).is_some_and(Value::is_null) {
                            fields.remove(key);
                            continue;
                        }
                        if let Some(inner) = fields.get_mut(key) {
                            self.canonicalise(property, inner);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// `node` with `$ref`s resolved, followed by its `anyOf`/`oneOf`/`allOf` branches.
    fn shapes<'s>(&'s self, node: &'s Value, out: &mut Vec<&'s Value>) {
        if let Some(target) = node
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|reference| reference.strip_prefix('#'))
            .and_then(|pointer| self.document.pointer(pointer))
        {
            self.shapes(target, out);
            return;
        }
        out.push(node);
        for keyword in ["anyOf", "oneOf", "allOf"] {
            if let Some(Value::Array(branches)) = node.get(keyword) {
                for branch in branches {
                    self.shapes(branch, out);
                }
            }
        }
    }

    fn canonical(&self, raw: &str, allowed: &[&str]) -> Option<String> {
        if allowed.is_empty() || allowed.contains(&raw) {
            return None;
        }
        let wanted = normalize(raw);
        allowed
            .iter()
            .find(|value| normalize(value) == wanted)
            .map(|value| (*value).to_owned())
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|(alias, canonical)| {
                        normalize(alias) == wanted && allowed.contains(&canonical.as_str())
                    })
                    .map(|(_, canonical)| canonical.clone())
            })
    }
}

/// One structural defect in an oracle response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer prefixed with `$`, e.g. `$/findings/2/severity`.
    pub path: String,
    /// What was wrong.
    pub reason: String,
}

impl SchemaViolation {
    /// Creates a violation.
    #[must_use]
    pub fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

fn enum_values<'s>(shapes: &[&'s Value]) -> Vec<&'s str> {
    shapes
        .iter()
        .flat_map(|shape| {
            let listed = shape
                .get("enum")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str);
            listed.chain(shape.get("const").and_then(Value::as_str))
        })
        .collect()
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[serde(rename_all = "snake_case")]
    enum Kind {
        /// Clause breaks the rule.
        Violation,
        /// Provision missing.
        Gap,
        PartialCompliance,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Entry {
        clause_id: String,
        kind: Kind,
        #[serde(default)]
        level: Option<Kind>,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Entries {
        findings: Vec<Entry>,
    }

    fn contract() -> ResponseSchema {
        ResponseSchema::of::<Entries>("findings").with_alias("partial", "partial_compliance")
    }

    #[test]
    fn canonicalises_enum_spellings() {
        let mut value = json!({ "findings": [
            { "clause_id": "C1", "kind": "Partial Compliance" },
            { "clause_id": "C2", "kind": "partial", "level": "GAP" },
            { "clause_id": "C3", "kind": "VIOLATION", "tags": null }
        ]});
        contract().validate(&mut value).unwrap();
        assert_eq!(value["findings"][0]["kind"], "partial_compliance");
        assert_eq!(value["findings"][1]["kind"], "partial_compliance");
        assert_eq!(value["findings"][1]["level"], "gap");
        assert_eq!(value["findings"][2]["kind"], "violation");
        assert!(value["findings"][2].get("tags").is_none());
        let parsed: Entries = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed.findings[1].level, Some(Kind::Gap)));
    }

    #[test]
    fn reports_violations_with_pointers() {
        let mut value = json!({ "findings": [
            { "kind": "violation" },
            { "clause_id": 7, "kind": "breach" }
        ]});
        let violations = contract().validate(&mut value).unwrap_err();
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert!(paths.contains(&"$/findings/0"));
        assert!(paths.contains(&"$/findings/1/clause_id"));
        assert!(paths.contains(&"$/findings/1/kind"));
        assert!(violations.iter().any(|v| v.reason.contains("clause_id")));
    }

    #[test]
    fn rejects_wrong_root() {
        let mut value = json!(["not", "an", "object"]);
        let violations = contract().validate(&mut value).unwrap_err();
        assert_eq!(violations[0].path, "$");
    }

    #[test]
    fn renders_generated_schema() {
        let schema = contract();
        assert!(schema.ready().is_ok());
        let text = schema.render();
        assert!(text.contains("\"findings\""));
        assert!(text.contains("\"partial_compliance\""));
        assert!(text.contains("\"clause_id\""));
        assert_eq!(schema.document()["type"], "object");
    }
}
