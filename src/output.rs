use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SquallError};
use crate::schema::{IssueKind, Schema, SchemaIssue, SchemaIssues};

/// The schema-validated final output of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply {
    value: Value,
    raw: String,
}

impl StructuredReply {
    pub(crate) fn new(value: Value, raw: impl Into<String>) -> Self {
        Self {
            value,
            raw: raw.into(),
        }
    }

    /// Wrap free text when no reply schema was declared.
    pub(crate) fn plain(text: String) -> Self {
        Self {
            value: Value::String(text.clone()),
            raw: text,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// A declared field's value, with `null` treated as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.get(name).filter(|v| !v.is_null())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// Decodes a model's free-form final text against a declared contract.
#[derive(Debug, Clone, Default)]
pub struct OutputExtractor {
    schema: Schema,
}

impl OutputExtractor {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Locate a JSON object in `raw` and validate it. Several candidate
    /// objects may appear in prose; the first one satisfying the schema
    /// wins, otherwise the first candidate's mismatches are reported.
    pub fn extract(&self, raw: &str) -> Result<StructuredReply> {
        let candidates = json_candidates(raw);
        if candidates.is_empty() {
            return Err(SquallError::InvalidReply(SchemaIssues(vec![SchemaIssue {
                field: "$".into(),
                problem: IssueKind::Unparseable,
            }])));
        }

        let mut first_issues: Option<SchemaIssues> = None;
        for candidate in &candidates {
            match self.schema.validate(candidate) {
                Ok(()) => return Ok(StructuredReply::new(candidate.clone(), raw)),
                Err(issues) => {
                    first_issues.get_or_insert(issues);
                }
            }
        }
        Err(SquallError::InvalidReply(first_issues.unwrap_or_default()))
    }
}

fn json_candidates(text: &str) -> Vec<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_object() {
            return vec![value];
        }
    }

    // Balanced-brace scan for objects embedded in prose or code fences.
    let mut values = Vec::new();
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            if let Ok(value) = serde_json::from_str::<Value>(&text[s..=i]) {
                                values.push(value);
                            }
                        }
                        start = None;
                    }
                }
            }
            '"' if !escape_next => {
                if depth > 0 {
                    in_string = !in_string;
                }
            }
            '\\' if in_string && !escape_next => {
                escape_next = true;
                continue;
            }
            _ => {}
        }
        escape_next = false;
    }

    values
}
