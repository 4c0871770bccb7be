//! Registry adapter
//!
//! Accumulates validated personality profiles on the coordinator and renders
//! them as resource and tool listings. Registration is idempotent by agent
//! name: the first profile registered under a name is kept.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::personality::{PersonalityProfile, PersonalityTrait};
use crate::protocol::NodeRid;

/// Resource type reported for every agent profile.
pub const AGENT_PROFILE_TYPE: &str = "agent_profile";

/// Prefix of resource ids naming an agent.
pub const AGENT_RESOURCE_PREFIX: &str = "agent:";

/// Input schema advertised for every tool.
pub fn tool_input_schema() -> Value {
    json!({"type": "string"})
}

// ─────────────────────────────────────────────────────────────────
// Listing Types
// ─────────────────────────────────────────────────────────────────

/// A listable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub description: String,
    pub url: String,
}

/// An invokable tool projected from a callable trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub url: String,
}

impl Tool {
    /// Project a trait into a tool served under `call_root`.
    pub fn from_trait(t: &PersonalityTrait, call_root: &str) -> Self {
        Self {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: tool_input_schema(),
            url: format!("{}/tools/call/{}", call_root, t.name),
        }
    }
}

/// Outcome of [`RegistryAdapter::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First profile under this name; now listed.
    Registered,
    /// Name already registered by the same node; ignored.
    Duplicate,
    /// Name already registered by a different node; ignored.
    Conflict { existing: NodeRid, incoming: NodeRid },
}

// ─────────────────────────────────────────────────────────────────
// Registry Adapter
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Entries {
    /// Names in registration order.
    order: Vec<String>,
    agents: HashMap<String, PersonalityProfile>,
}

/// Thread-safe catalog of known agent personalities.
#[derive(Default)]
pub struct RegistryAdapter {
    entries: RwLock<Entries>,
}

impl RegistryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated profile. Later profiles under a known name are
    /// ignored.
    pub fn register(&self, profile: PersonalityProfile) -> Registration {
        let mut entries = self.entries.write();
        let name = profile.name().to_string();

        if let Some(existing) = entries.agents.get(&name) {
            if existing.node_rid() == profile.node_rid() {
                tracing::debug!(agent = %name, "Agent already registered, skipping");
                return Registration::Duplicate;
            }
            let outcome = Registration::Conflict {
                existing: existing.node_rid().clone(),
                incoming: profile.node_rid().clone(),
            };
            tracing::warn!(
                agent = %name,
                existing = %existing.node_rid(),
                incoming = %profile.node_rid(),
                "Agent name already registered by another node, keeping first"
            );
            return outcome;
        }

        tracing::info!(agent = %name, rid = %profile.rid(), "Registering agent");
        entries.order.push(name.clone());
        entries.agents.insert(name, profile);
        Registration::Registered
    }

    /// Node that owns the registration under `name`, if any.
    pub fn owner_of(&self, name: &str) -> Option<NodeRid> {
        self.entries
            .read()
            .agents
            .get(name)
            .map(|profile| profile.node_rid().clone())
    }

    pub fn get(&self, name: &str) -> Option<PersonalityProfile> {
        self.entries.read().agents.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One resource per registered agent, in registration order.
    pub fn list_resources(&self) -> Vec<Resource> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|name| entries.agents.get(name))
            .map(|profile| Resource {
                id: format!("{}{}", AGENT_RESOURCE_PREFIX, profile.name()),
                resource_type: AGENT_PROFILE_TYPE.to_string(),
                description: format!("Agent {} personality profile", profile.name()),
                url: profile.tool_base_url().to_string(),
            })
            .collect()
    }

    /// Callable traits of one agent, under their local names.
    pub fn get_tools(&self, name: &str) -> Vec<Tool> {
        self.entries
            .read()
            .agents
            .get(name)
            .map(agent_tools)
            .unwrap_or_default()
    }

    /// Tools of every agent, named `<agent>.<trait>`.
    pub fn get_all_tools(&self) -> Vec<Tool> {
        let entries = self.entries.read();
        let mut tools = Vec::new();
        for name in &entries.order {
            let Some(profile) = entries.agents.get(name) else {
                continue;
            };
            tools.extend(agent_tools(profile).into_iter().map(|mut tool| {
                tool.name = format!("{}.{}", name, tool.name);
                tool
            }));
        }
        tools
    }
}

fn agent_tools(profile: &PersonalityProfile) -> Vec<Tool> {
    profile
        .callable_traits()
        .map(|t| Tool::from_trait(t, profile.tool_base_url()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentPersonality;

    fn agent(name: &str, node: &NodeRid, traits: Vec<PersonalityTrait>) -> PersonalityProfile {
        PersonalityProfile::new(
            AgentPersonality::new(name, "1.0"),
            node.clone(),
            format!("http://127.0.0.1:8100/{}", name),
            traits,
        )
    }

    fn callable(name: &str, value: &str) -> PersonalityTrait {
        PersonalityTrait::from_value(name, value, "", true)
    }

    #[test]
    fn test_register_is_idempotent() {
        let adapter = RegistryAdapter::new();
        let node = NodeRid::generate("weather");
        let profile = agent("weather", &node, vec![callable("mood", "sunny")]);

        assert_eq!(adapter.register(profile.clone()), Registration::Registered);
        assert_eq!(adapter.register(profile), Registration::Duplicate);
        assert_eq!(adapter.len(), 1);
    }

    #[test]
    fn test_first_writer_wins_on_conflict() {
        let adapter = RegistryAdapter::new();
        let first = NodeRid::generate("weather");
        let second = NodeRid::generate("weather");

        adapter.register(agent("weather", &first, vec![callable("mood", "sunny")]));
        let outcome = adapter.register(agent("weather", &second, vec![callable("mood", "rainy")]));

        assert_eq!(
            outcome,
            Registration::Conflict {
                existing: first.clone(),
                incoming: second,
            }
        );
        let kept = adapter.get("weather").unwrap();
        assert_eq!(kept.node_rid(), &first);
        assert_eq!(kept.get_trait("mood").unwrap().value.to_string(), "sunny");
        assert_eq!(adapter.owner_of("weather"), Some(first));
        assert_eq!(adapter.owner_of("unknown"), None);
    }

    #[test]
    fn test_list_resources_in_registration_order() {
        let adapter = RegistryAdapter::new();
        for name in ["zeta", "alpha", "mid"] {
            adapter.register(agent(name, &NodeRid::generate(name), vec![]));
        }

        let resources = adapter.list_resources();
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["agent:zeta", "agent:alpha", "agent:mid"]);
        assert_eq!(resources[0].resource_type, "agent_profile");
        assert_eq!(resources[0].description, "Agent zeta personality profile");
        assert_eq!(resources[0].url, "http://127.0.0.1:8100/zeta/mcp");
    }

    #[test]
    fn test_get_tools_only_callable() {
        let adapter = RegistryAdapter::new();
        adapter.register(agent(
            "weather",
            &NodeRid::generate("weather"),
            vec![
                callable("mood", "sunny"),
                PersonalityTrait::from_value("temperature", 21_i64, "", false),
            ],
        ));

        let tools = adapter.get_tools("weather");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "mood");
        assert_eq!(tools[0].url, "http://127.0.0.1:8100/weather/mcp/tools/call/mood");
        assert_eq!(tools[0].input_schema, json!({"type": "string"}));

        assert!(adapter.get_tools("unknown").is_empty());
    }

    #[test]
    fn test_all_tools_are_prefixed_and_unique() {
        let adapter = RegistryAdapter::new();
        adapter.register(agent("a", &NodeRid::generate("a"), vec![callable("ping", "pong")]));
        adapter.register(agent("b", &NodeRid::generate("b"), vec![callable("ping", "pong")]));

        let names: Vec<String> = adapter.get_all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a.ping".to_string(), "b.ping".to_string()]);

        // per-agent listing keeps local names
        assert_eq!(adapter.get_tools("a")[0].name, "ping");
    }

    #[test]
    fn test_resource_json_shape() {
        let resource = Resource {
            id: "agent:weather".into(),
            resource_type: AGENT_PROFILE_TYPE.into(),
            description: "d".into(),
            url: "u".into(),
        };
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["type"], json!("agent_profile"));
    }
}
