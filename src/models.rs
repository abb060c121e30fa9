use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LibError, Result};
use crate::validate::{parse_person_id, sanitize_text};

/// Surrogate key of a person row. The storage column is a 32-bit
/// integer, so 2,147,483,647 is the ceiling for valid IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub i32);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PersonId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i32::from_str(s).map(Self)
    }
}

impl From<i32> for PersonId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationId(pub i32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl Gender {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }

    /// Lenient parse for request payloads: absent or unrecognized
    /// values become `Unknown` rather than an error.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .and_then(Self::from_db_value)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub gender: Gender,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: RelationId,
    pub from_person_id: PersonId,
    pub to_person_id: PersonId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Relation {
    pub fn pair(&self) -> UnorderedPair {
        UnorderedPair::new(self.from_person_id, self.to_person_id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonBackground {
    pub id: i32,
    pub person_id: PersonId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Endpoint pair with direction erased. Two relations are the same
/// relation when their `UnorderedPair`s are equal, whichever way the
/// rows were stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnorderedPair {
    lo: PersonId,
    hi: PersonId,
}

impl UnorderedPair {
    pub fn new(a: PersonId, b: PersonId) -> Self {
        if a <= b { Self { lo: a, hi: b } } else { Self { lo: b, hi: a } }
    }

    pub const fn lo(&self) -> PersonId {
        self.lo
    }

    pub const fn hi(&self) -> PersonId {
        self.hi
    }
}

impl fmt::Display for UnorderedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lo, self.hi)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPersonPayload {
    pub name: String,
    pub description: Option<String>,
    pub gender: Option<String>,
}

/// Sanitized person fields ready for insertion.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub description: Option<String>,
    pub gender: Gender,
}

impl NewPersonPayload {
    pub fn normalize(self) -> Result<NewPerson> {
        let name = sanitize_text(&self.name);
        if name.is_empty() {
            return Err(LibError::invalid(
                "Person name is required",
                anyhow!("person name empty after sanitization"),
            ));
        }

        let description = self
            .description
            .as_deref()
            .map(sanitize_text)
            .filter(|text| !text.is_empty());

        Ok(NewPerson {
            name,
            description,
            gender: Gender::parse_lenient(self.gender.as_deref()),
        })
    }
}

/// Relation write payload. `from`/`to` arrive as JSON numbers or
/// numeric strings, so they are kept raw until ID validation runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationPayload {
    pub from: Value,
    pub to: Value,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RelationEndpoints {
    pub from: PersonId,
    pub to: PersonId,
    pub source: Option<String>,
}

impl RelationPayload {
    pub fn normalize(self) -> Result<RelationEndpoints> {
        let from = parse_person_id(&self.from, "from")?;
        let to = parse_person_id(&self.to, "to")?;
        if from == to {
            return Err(LibError::invalid(
                "A person cannot relate to themselves",
                anyhow!("self-loop rejected for person {}", from),
            ));
        }

        let source = self
            .source
            .as_deref()
            .map(sanitize_text)
            .filter(|text| !text.is_empty());

        Ok(RelationEndpoints { from, to, source })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRelationPayload {
    pub from: Value,
    pub to: Value,
}

impl DeleteRelationPayload {
    pub fn normalize(self) -> Result<UnorderedPair> {
        let from = parse_person_id(&self.from, "from")?;
        let to = parse_person_id(&self.to, "to")?;
        if from == to {
            return Err(LibError::invalid(
                "A person cannot relate to themselves",
                anyhow!("self-loop rejected for person {}", from),
            ));
        }
        Ok(UnorderedPair::new(from, to))
    }
}

/// Background write payload. `birthYear` arrives as a JSON number or
/// numeric string, like IDs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundPayload {
    pub id: Value,
    pub birth_year: Option<Value>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBackground {
    pub person_id: PersonId,
    pub birth_year: Option<i32>,
    pub body: Option<String>,
}

fn parse_birth_year(value: &Value) -> Result<i32> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|year| i32::try_from(year).ok())
        .ok_or_else(|| {
            LibError::invalid(
                "Invalid birth year",
                anyhow!("birth year {} is not a plausible integer", value),
            )
        })
}

impl BackgroundPayload {
    pub fn normalize(self) -> Result<NewBackground> {
        let person_id = parse_person_id(&self.id, "id")?;
        let birth_year = match &self.birth_year {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_birth_year(value)?),
        };

        let body = self
            .body
            .as_deref()
            .map(sanitize_text)
            .filter(|text| !text.is_empty());

        Ok(NewBackground {
            person_id,
            birth_year,
            body,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

/// Node as rendered in the default graph view: connected persons only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: PersonId,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: RelationId,
    pub from: PersonId,
    pub to: PersonId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub counts: GraphCounts,
}

/// Single-node neighborhood report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRelations {
    pub person: Person,
    pub relations: Vec<Relation>,
    pub neighbors: Vec<Person>,
    pub degree: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unordered_pair_erases_direction() {
        let a = PersonId(3);
        let b = PersonId(7);
        assert_eq!(UnorderedPair::new(a, b), UnorderedPair::new(b, a));
        assert_eq!(UnorderedPair::new(a, b).lo(), a);
        assert_eq!(UnorderedPair::new(b, a).hi(), b);
    }

    #[test]
    fn gender_parses_leniently() {
        assert_eq!(Gender::parse_lenient(Some("female")), Gender::Female);
        assert_eq!(Gender::parse_lenient(Some(" male ")), Gender::Male);
        assert_eq!(Gender::parse_lenient(Some("martian")), Gender::Unknown);
        assert_eq!(Gender::parse_lenient(None), Gender::Unknown);
    }

    #[test]
    fn person_payload_sanitizes_and_defaults() {
        let payload = NewPersonPayload {
            name: "  Alice <b>the Great</b> ".to_string(),
            description: Some("<script>alert(1)</script>  ".to_string()),
            gender: None,
        };

        let person = payload.normalize().expect("payload should normalize");
        assert_eq!(person.name, "Alice the Great");
        assert_eq!(person.description, None);
        assert_eq!(person.gender, Gender::Unknown);
    }

    #[test]
    fn person_payload_rejects_markup_only_name() {
        let payload = NewPersonPayload {
            name: "<script>window.x=1</script>".to_string(),
            description: None,
            gender: None,
        };

        let err = payload.normalize().expect_err("empty name should fail");
        assert_eq!(err.public, "Person name is required");
    }

    #[test]
    fn relation_payload_accepts_string_and_number_ids() {
        let payload = RelationPayload {
            from: json!("12"),
            to: json!(34),
            source: Some("census record".to_string()),
        };

        let endpoints = payload.normalize().expect("payload should normalize");
        assert_eq!(endpoints.from, PersonId(12));
        assert_eq!(endpoints.to, PersonId(34));
        assert_eq!(endpoints.source.as_deref(), Some("census record"));
    }

    #[test]
    fn relation_payload_rejects_self_loop() {
        let payload = RelationPayload {
            from: json!("5"),
            to: json!(5),
            source: None,
        };

        let err = payload.normalize().expect_err("self-loop should fail");
        assert_eq!(err.public, "A person cannot relate to themselves");
    }

    #[test]
    fn delete_payload_normalizes_to_unordered_pair() {
        let forward = DeleteRelationPayload {
            from: json!(1),
            to: json!(2),
        };
        let reverse = DeleteRelationPayload {
            from: json!("2"),
            to: json!("1"),
        };

        assert_eq!(
            forward.normalize().expect("forward pair"),
            reverse.normalize().expect("reverse pair"),
        );
    }

    #[test]
    fn background_payload_keeps_year_and_strips_markup() {
        let payload = BackgroundPayload {
            id: json!(9),
            birth_year: Some(json!("1901")),
            body: Some("Born in <i>Kyoto</i>".to_string()),
        };

        let background = payload.normalize().expect("payload should normalize");
        assert_eq!(background.person_id, PersonId(9));
        assert_eq!(background.birth_year, Some(1901));
        assert_eq!(background.body.as_deref(), Some("Born in Kyoto"));
    }
}
