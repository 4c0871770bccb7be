//! Core types for agent personalities.
//!
//! A personality is a named, versioned bundle of typed traits. Some traits
//! are callable and are exposed as tools by the agent and registry servers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{AgentPersonality, NodeRid};

/// Suffix appended to an agent's base URL to form its tool endpoint root.
pub const TOOL_PATH_SUFFIX: &str = "/mcp";

// ─────────────────────────────────────────────────────────────────
// Trait Value
// ─────────────────────────────────────────────────────────────────

/// Value carried by a trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Objects, lists and null.
    Structured(Value),
}

impl TraitValue {
    /// Type tag matching this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TraitValue::Boolean(_) => "bool",
            TraitValue::Integer(_) => "int",
            TraitValue::Float(_) => "float",
            TraitValue::String(_) => "str",
            TraitValue::Structured(Value::Object(_)) => "dict",
            TraitValue::Structured(Value::Array(_)) => "list",
            TraitValue::Structured(_) => "none",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TraitValue::Boolean(b) => Value::Bool(*b),
            TraitValue::Integer(i) => Value::from(*i),
            TraitValue::Float(f) => Value::from(*f),
            TraitValue::String(s) => Value::String(s.clone()),
            TraitValue::Structured(v) => v.clone(),
        }
    }
}

impl From<Value> for TraitValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => TraitValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TraitValue::Integer(i),
                None => TraitValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => TraitValue::String(s),
            other => TraitValue::Structured(other),
        }
    }
}

impl From<&str> for TraitValue {
    fn from(value: &str) -> Self {
        TraitValue::String(value.to_string())
    }
}

impl From<String> for TraitValue {
    fn from(value: String) -> Self {
        TraitValue::String(value)
    }
}

impl From<i64> for TraitValue {
    fn from(value: i64) -> Self {
        TraitValue::Integer(value)
    }
}

impl From<f64> for TraitValue {
    fn from(value: f64) -> Self {
        TraitValue::Float(value)
    }
}

impl From<bool> for TraitValue {
    fn from(value: bool) -> Self {
        TraitValue::Boolean(value)
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraitValue::Boolean(b) => write!(f, "{}", b),
            TraitValue::Integer(i) => write!(f, "{}", i),
            TraitValue::Float(x) => write!(f, "{}", x),
            TraitValue::String(s) => f.write_str(s),
            TraitValue::Structured(v) => write!(f, "{}", v),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Personality Trait
// ─────────────────────────────────────────────────────────────────

/// A single named trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityTrait {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Free-form type tag. Inferred from the value when not given.
    #[serde(rename = "type")]
    pub trait_type: String,

    pub value: TraitValue,

    #[serde(default)]
    pub is_callable: bool,
}

impl PersonalityTrait {
    /// Create a trait from a value, inferring its type tag.
    ///
    /// An empty description defaults to `"<name> trait"`.
    pub fn from_value(
        name: impl Into<String>,
        value: impl Into<TraitValue>,
        description: impl Into<String>,
        is_callable: bool,
    ) -> Self {
        let name = name.into();
        let value = value.into();
        let description = description.into();
        Self {
            description: if description.is_empty() {
                format!("{} trait", name)
            } else {
                description
            },
            trait_type: value.type_tag().to_string(),
            name,
            value,
            is_callable,
        }
    }

    /// Build a trait from one entry of the configured traits map.
    ///
    /// An object entry is read as a `{description, type, value, is_callable}`
    /// record (every field optional). Anything else is a bare value whose
    /// type is inferred and which is not callable.
    pub fn from_config_entry(name: &str, entry: &Value) -> Self {
        match entry {
            Value::Object(record) => {
                let value = TraitValue::from(record.get("value").cloned().unwrap_or(Value::Null));
                let trait_type = record
                    .get("type")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| value.type_tag().to_string());

                Self {
                    name: name.to_string(),
                    description: record
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    trait_type,
                    value,
                    is_callable: record
                        .get("is_callable")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }
            }
            bare => {
                let value = TraitValue::from(bare.clone());
                Self {
                    name: name.to_string(),
                    description: String::new(),
                    trait_type: value.type_tag().to_string(),
                    value,
                    is_callable: false,
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Personality Profile
// ─────────────────────────────────────────────────────────────────

/// An agent's complete personality profile.
///
/// Identity and owning node are fixed at construction; traits may be added
/// or changed in place by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    rid: AgentPersonality,

    node_rid: NodeRid,

    #[serde(default)]
    base_url: Option<String>,

    #[serde(default, rename = "mcp_url")]
    tool_base_url: Option<String>,

    #[serde(default)]
    traits: Vec<PersonalityTrait>,
}

impl PersonalityProfile {
    pub fn new(
        rid: AgentPersonality,
        node_rid: NodeRid,
        base_url: impl Into<String>,
        traits: Vec<PersonalityTrait>,
    ) -> Self {
        let base_url = base_url.into();
        let tool_base_url = format!("{}{}", base_url.trim_end_matches('/'), TOOL_PATH_SUFFIX);
        let mut profile = Self {
            rid,
            node_rid,
            base_url: Some(base_url),
            tool_base_url: Some(tool_base_url),
            traits: Vec::with_capacity(traits.len()),
        };
        for t in traits {
            profile.upsert_trait(t);
        }
        profile
    }

    /// Validate knowledge-object contents against the profile shape.
    ///
    /// Duplicate trait names collapse to the last occurrence.
    pub fn from_contents(rid: &AgentPersonality, contents: &Value) -> Result<Self> {
        let mut profile: Self = serde_json::from_value(contents.clone())
            .map_err(|e| Error::profile_invalid(rid, e.to_string()))?;

        if &profile.rid != rid {
            return Err(Error::profile_invalid(
                rid,
                format!("contents describe {}", profile.rid),
            ));
        }

        for t in std::mem::take(&mut profile.traits) {
            profile.upsert_trait(t);
        }
        Ok(profile)
    }

    /// Serialize as knowledge-object contents.
    pub fn to_contents(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn rid(&self) -> &AgentPersonality {
        &self.rid
    }

    pub fn name(&self) -> &str {
        &self.rid.name
    }

    pub fn node_rid(&self) -> &NodeRid {
        &self.node_rid
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Root URL of this agent's tool endpoints (`<base_url>/mcp`).
    pub fn tool_base_url(&self) -> &str {
        self.tool_base_url.as_deref().unwrap_or_default()
    }

    pub fn traits(&self) -> &[PersonalityTrait] {
        &self.traits
    }

    pub fn callable_traits(&self) -> impl Iterator<Item = &PersonalityTrait> {
        self.traits.iter().filter(|t| t.is_callable)
    }

    pub fn get_trait(&self, name: &str) -> Option<&PersonalityTrait> {
        self.traits.iter().find(|t| t.name == name)
    }

    /// Replace a trait's value. Returns false if no trait has this name.
    pub fn update_trait(&mut self, name: &str, value: impl Into<TraitValue>) -> bool {
        match self.traits.iter_mut().find(|t| t.name == name) {
            Some(t) => {
                t.value = value.into();
                true
            }
            None => false,
        }
    }

    /// Append a trait; an existing trait with the same name is replaced.
    pub fn add_trait(&mut self, new_trait: PersonalityTrait) {
        self.upsert_trait(new_trait);
    }

    /// Insert or replace by name, keeping the original position on replace.
    pub fn upsert_trait(&mut self, new_trait: PersonalityTrait) {
        match self.traits.iter_mut().find(|t| t.name == new_trait.name) {
            Some(existing) => *existing = new_trait,
            None => self.traits.push(new_trait),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> PersonalityProfile {
        PersonalityProfile::new(
            AgentPersonality::new("weather", "1.0"),
            NodeRid::generate("weather"),
            "http://127.0.0.1:8100/",
            vec![
                PersonalityTrait::from_value("mood", "sunny", "Current mood", true),
                PersonalityTrait::from_value("temperature", 21_i64, "", false),
            ],
        )
    }

    #[test]
    fn test_tool_base_url_is_derived() {
        assert_eq!(profile().tool_base_url(), "http://127.0.0.1:8100/mcp");
    }

    #[test]
    fn test_from_value_infers_type() {
        let t = PersonalityTrait::from_value("temperature", 21_i64, "", false);
        assert_eq!(t.trait_type, "int");
        assert_eq!(t.description, "temperature trait");

        assert_eq!(TraitValue::from(json!(1.5)).type_tag(), "float");
        assert_eq!(TraitValue::from(json!(true)).type_tag(), "bool");
        assert_eq!(TraitValue::from(json!({"a": 1})).type_tag(), "dict");
        assert_eq!(TraitValue::from(json!([1, 2])).type_tag(), "list");
        assert_eq!(TraitValue::from(json!(null)).type_tag(), "none");
    }

    #[test]
    fn test_config_entry_record() {
        let entry = json!({"description": "Mood", "value": "sunny", "is_callable": true});
        let t = PersonalityTrait::from_config_entry("mood", &entry);
        assert_eq!(t.description, "Mood");
        assert_eq!(t.trait_type, "str");
        assert_eq!(t.value, TraitValue::String("sunny".into()));
        assert!(t.is_callable);
    }

    #[test]
    fn test_config_entry_explicit_type_is_kept() {
        let entry = json!({"type": "celsius", "value": 21});
        let t = PersonalityTrait::from_config_entry("temperature", &entry);
        assert_eq!(t.trait_type, "celsius");
        assert!(!t.is_callable);
    }

    #[test]
    fn test_config_entry_bare_value() {
        let t = PersonalityTrait::from_config_entry("tone", &json!("friendly"));
        assert_eq!(t.trait_type, "str");
        assert_eq!(t.description, "");
        assert!(!t.is_callable);
    }

    #[test]
    fn test_trait_mutation() {
        let mut p = profile();
        assert!(p.update_trait("mood", "rainy"));
        assert_eq!(p.get_trait("mood").unwrap().value.to_string(), "rainy");
        assert!(!p.update_trait("missing", 1_i64));

        p.add_trait(PersonalityTrait::from_value("mood", "stormy", "", false));
        assert_eq!(p.traits().len(), 2);
        assert_eq!(p.traits()[0].name, "mood");
        assert!(!p.get_trait("mood").unwrap().is_callable);
    }

    #[test]
    fn test_contents_round_trip() {
        let p = profile();
        let contents = p.to_contents().unwrap();
        assert_eq!(contents["mcp_url"], json!("http://127.0.0.1:8100/mcp"));
        let parsed = PersonalityProfile::from_contents(p.rid(), &contents).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_contents_missing_fields_rejected() {
        let rid = AgentPersonality::new("weather", "1.0");
        let err = PersonalityProfile::from_contents(&rid, &json!({"invalid": "data"})).unwrap_err();
        assert!(matches!(err, Error::ProfileInvalid { .. }));
    }

    #[test]
    fn test_contents_for_other_identity_rejected() {
        let p = profile();
        let other = AgentPersonality::new("weather", "2.0");
        assert!(PersonalityProfile::from_contents(&other, &p.to_contents().unwrap()).is_err());
    }

    #[test]
    fn test_duplicate_trait_names_collapse() {
        let p = profile();
        let mut contents = p.to_contents().unwrap();
        contents["traits"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "mood", "type": "str", "value": "foggy"}));

        let parsed = PersonalityProfile::from_contents(p.rid(), &contents).unwrap();
        assert_eq!(parsed.traits().len(), 2);
        assert_eq!(parsed.get_trait("mood").unwrap().value.to_string(), "foggy");
    }
}
