use std::fmt;

use serde_json::{json, Map, Value};

/// Kinds a declared field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }
}

fn value_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared field of a structural contract.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
}

/// A structural contract over a JSON object: named, typed fields, some of
/// them optional. Tool arguments are checked against one at call time and
/// final replies at extraction time.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: None,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: None,
        });
        self
    }

    /// Attach a human-readable description to an already-declared field.
    pub fn describe(mut self, name: &str, text: &str) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.description = Some(text.to_string());
        }
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `value` against the contract. Fields the schema does not
    /// declare are ignored; `null` counts as absent.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), SchemaIssues> {
        let mut issues = Vec::new();

        let Some(object) = value.as_object() else {
            issues.push(SchemaIssue {
                field: "$".into(),
                problem: IssueKind::NotAnObject {
                    found: value_label(value),
                },
            });
            return Err(SchemaIssues(issues));
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        issues.push(SchemaIssue {
                            field: field.name.clone(),
                            problem: IssueKind::MissingField,
                        });
                    }
                }
                Some(present) => {
                    if !field.kind.accepts(present) {
                        issues.push(SchemaIssue {
                            field: field.name.clone(),
                            problem: IssueKind::WrongType {
                                expected: field.kind.label(),
                                found: value_label(present),
                            },
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaIssues(issues))
        }
    }

    /// Render the contract as a JSON-Schema-shaped declaration for model
    /// providers.
    pub fn to_value(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut spec = Map::new();
            spec.insert("type".into(), Value::String(field.kind.label().into()));
            if let Some(text) = &field.description {
                spec.insert("description".into(), Value::String(text.clone()));
            }
            properties.insert(field.name.clone(), Value::Object(spec));
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    MissingField,
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    NotAnObject {
        found: &'static str,
    },
    Unparseable,
}

/// A single field-level mismatch between a value and its contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub field: String,
    pub problem: IssueKind,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            IssueKind::MissingField => write!(f, "`{}` is required but missing", self.field),
            IssueKind::WrongType { expected, found } => {
                write!(f, "`{}` expected {expected}, found {found}", self.field)
            }
            IssueKind::NotAnObject { found } => write!(f, "expected a JSON object, found {found}"),
            IssueKind::Unparseable => write!(f, "no JSON object could be parsed from the reply"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaIssues(pub Vec<SchemaIssue>);

impl SchemaIssues {
    pub fn merge(mut self, other: SchemaIssues) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaIssue> {
        self.0.iter()
    }
}

impl fmt::Display for SchemaIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for issue in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply_schema() -> Schema {
        Schema::object()
            .required("punny_response", FieldKind::String)
            .optional("weather_conditions", FieldKind::String)
    }

    #[test]
    fn accepts_values_matching_the_contract() {
        let schema = reply_schema();
        let value = json!({"punny_response": "rain check!", "weather_conditions": "sunny"});
        assert!(schema.validate(&value).is_ok());
    }

    #[test]
    fn optional_fields_may_be_absent_or_null() {
        let schema = reply_schema();
        assert!(schema.validate(&json!({"punny_response": "hi"})).is_ok());
        assert!(schema
            .validate(&json!({"punny_response": "hi", "weather_conditions": null}))
            .is_ok());
    }

    #[test]
    fn reports_missing_required_fields() {
        let schema = reply_schema();
        let issues = schema.validate(&json!({"weather_conditions": "sunny"})).unwrap_err();
        assert_eq!(issues.0.len(), 1);
        assert_eq!(issues.0[0].field, "punny_response");
        assert_eq!(issues.0[0].problem, IssueKind::MissingField);
    }

    #[test]
    fn reports_type_mismatches_with_both_sides() {
        let schema = reply_schema();
        let issues = schema.validate(&json!({"punny_response": 7})).unwrap_err();
        assert_eq!(
            issues.0[0].problem,
            IssueKind::WrongType {
                expected: "string",
                found: "number"
            }
        );
        assert!(issues.to_string().contains("expected string, found number"));
    }

    #[test]
    fn undeclared_fields_are_ignored() {
        let schema = reply_schema();
        let value = json!({"punny_response": "hi", "mood": "chipper"});
        assert!(schema.validate(&value).is_ok());
    }

    #[test]
    fn renders_a_provider_facing_declaration() {
        let schema = reply_schema().describe("punny_response", "A pun-laden reply");
        let rendered = schema.to_value();

        assert_eq!(rendered["type"], "object");
        assert_eq!(
            rendered["properties"]["punny_response"]["description"],
            "A pun-laden reply"
        );
        assert_eq!(rendered["required"], json!(["punny_response"]));
    }
}
