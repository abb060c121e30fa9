use anyhow::anyhow;
use serde_json::Value;

use crate::error::{LibError, Result};
use crate::models::PersonId;

/// Largest surrogate key the storage schema can represent (signed
/// 32-bit column).
pub const MAX_ID: i64 = i32::MAX as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

impl FieldType {
    const fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One field's rules. A route's schema is a flat list of these.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub required: bool,
    pub expected: Option<FieldType>,
    pub max_length: Option<usize>,
    pub range: Option<(f64, f64)>,
}

impl FieldRule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            expected: None,
            max_length: None,
            range: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn typed(mut self, expected: FieldType) -> Self {
        self.expected = Some(expected);
        self
    }

    pub const fn max_length(mut self, limit: usize) -> Self {
        self.max_length = Some(limit);
        self
    }

    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }
}

/// Declarative request schema. `validate` collects every violation
/// before failing so clients see the whole list at once.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub rules: &'static [FieldRule],
}

impl Schema {
    pub const fn new(rules: &'static [FieldRule]) -> Self {
        Self { rules }
    }

    pub fn validate(&self, payload: &Value) -> Result<()> {
        let Some(object) = payload.as_object() else {
            return Err(LibError::invalid_with_details(
                "Request validation failed",
                vec!["Request body must be a JSON object".to_string()],
                anyhow!("payload was {}", json_type_name(payload)),
            ));
        };

        let mut violations = Vec::new();
        for rule in self.rules {
            let value = object.get(rule.name);
            let nullish = match value {
                None | Some(Value::Null) => true,
                Some(Value::String(text)) => text.trim().is_empty(),
                Some(_) => false,
            };

            if nullish {
                if rule.required {
                    violations.push(format!("Field '{}' is required", rule.name));
                }
                // Absent value: nothing further to check for this field.
                continue;
            }
            let value = value.expect("non-nullish value is present");

            if let Some(expected) = rule.expected {
                if !expected.matches(value) {
                    violations.push(format!(
                        "Field '{}' must be a {} (got {})",
                        rule.name,
                        expected.name(),
                        json_type_name(value),
                    ));
                }
            }

            if let Some(limit) = rule.max_length
                && let Some(text) = value.as_str()
                && text.chars().count() > limit
            {
                violations.push(format!(
                    "Field '{}' exceeds maximum length of {}",
                    rule.name, limit,
                ));
            }

            if let Some((min, max)) = rule.range {
                match numeric_value(value) {
                    Some(number) if number >= min && number <= max => {}
                    Some(number) => violations.push(format!(
                        "Field '{}' must be between {} and {} (got {})",
                        rule.name, min, max, number,
                    )),
                    None => violations.push(format!(
                        "Field '{}' must be a number",
                        rule.name,
                    )),
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(LibError::invalid_with_details(
                "Request validation failed",
                violations,
                anyhow!("schema validation rejected payload"),
            ))
        }
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|n| n.is_finite()),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Strips `<script>` blocks, then any remaining tag-like markup, then
/// trims. Applied to every free-text field after validation and before
/// persistence.
pub fn sanitize_text(input: &str) -> String {
    let without_scripts = strip_script_blocks(input);
    let mut output = String::with_capacity(without_scripts.len());
    let mut chars = without_scripts.chars();
    while let Some(ch) = chars.next() {
        if ch == '<' {
            // Drop through the closing '>'; an unterminated tag drops
            // the rest of the input.
            for inner in chars.by_ref() {
                if inner == '>' {
                    break;
                }
            }
        } else {
            output.push(ch);
        }
    }
    output.trim().to_string()
}

fn strip_script_blocks(input: &str) -> String {
    const OPEN: &str = "<script";
    const CLOSE: &str = "</script>";

    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(start) = find_ascii_ci(rest, OPEN) else {
            output.push_str(rest);
            return output;
        };
        output.push_str(&rest[..start]);
        match find_ascii_ci(&rest[start..], CLOSE) {
            Some(offset) => rest = &rest[start + offset + CLOSE.len()..],
            // Unterminated script block swallows the tail.
            None => return output,
        }
    }
}

/// ASCII-case-insensitive substring search. The needle is ASCII, so a
/// match always falls on char boundaries of the haystack.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&idx| haystack[idx..idx + needle.len()].eq_ignore_ascii_case(needle))
}

/// Parses a caller-supplied person ID that may arrive as a JSON number
/// or a numeric string. Rejects non-integers, values below 1, and
/// values above the storage column's ceiling.
pub fn parse_person_id(value: &Value, field: &'static str) -> Result<PersonId> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    match parsed {
        Some(id) if id > 0 && id <= MAX_ID => Ok(PersonId(id as i32)),
        Some(id) => Err(LibError::invalid(
            "Invalid person ID",
            anyhow!("field '{}' value {} outside [1, {}]", field, id, MAX_ID),
        )),
        None => Err(LibError::invalid(
            "Invalid person ID",
            anyhow!("field '{}' value {} is not an integer", field, value),
        )),
    }
}
