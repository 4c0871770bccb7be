//! Knowledge-network message definitions
//!
//! Events, bundles and manifests flow between nodes as JSON. Every
//! knowledge object is addressed by a [`Rid`] and optionally carries the
//! serialized contents of the entity it describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::rid::{NodeRid, Rid, RidType};
use crate::error::Result;

// ─────────────────────────────────────────────────────────────────
// Endpoint Paths
// ─────────────────────────────────────────────────────────────────

/// Prefix under which the coordinator mounts the knowledge-network API.
pub const KOI_NET_PREFIX: &str = "/koi-net";

pub const BROADCAST_EVENTS_PATH: &str = "/events/broadcast";
pub const POLL_EVENTS_PATH: &str = "/events/poll";
pub const FETCH_RIDS_PATH: &str = "/rids/fetch";
pub const FETCH_MANIFESTS_PATH: &str = "/manifests/fetch";
pub const FETCH_BUNDLES_PATH: &str = "/bundles/fetch";

// ─────────────────────────────────────────────────────────────────
// Event Classification
// ─────────────────────────────────────────────────────────────────

/// Kind of change an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    New,
    Update,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::New => write!(f, "NEW"),
            EventType::Update => write!(f, "UPDATE"),
        }
    }
}

/// Where a knowledge object entered this node from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSource {
    /// Produced by this node.
    Local,
    /// Received from a peer.
    External,
}

impl std::fmt::Display for KnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KnowledgeSource::Local => write!(f, "local"),
            KnowledgeSource::External => write!(f, "external"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Manifests and Bundles
// ─────────────────────────────────────────────────────────────────

/// Fingerprint of an entity's contents at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub rid: Rid,
    pub timestamp: DateTime<Utc>,
    pub sha256_hash: String,
}

impl Manifest {
    pub fn generate(rid: Rid, contents: &Value) -> Result<Self> {
        Ok(Self {
            rid,
            timestamp: Utc::now(),
            sha256_hash: contents_hash(contents)?,
        })
    }
}

/// Hex SHA-256 of the serialized contents.
pub fn contents_hash(contents: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(contents)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Manifest plus the contents it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub manifest: Manifest,
    pub contents: Value,
}

impl Bundle {
    pub fn generate(rid: impl Into<Rid>, contents: Value) -> Result<Self> {
        Ok(Self {
            manifest: Manifest::generate(rid.into(), &contents)?,
            contents,
        })
    }

    pub fn rid(&self) -> &Rid {
        &self.manifest.rid
    }
}

// ─────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────

/// A change notification exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub rid: Rid,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Value>,
}

impl Event {
    pub fn from_bundle(event_type: EventType, bundle: Bundle) -> Self {
        Self {
            rid: bundle.manifest.rid.clone(),
            event_type,
            manifest: Some(bundle.manifest),
            contents: Some(bundle.contents),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Knowledge Object
// ─────────────────────────────────────────────────────────────────

/// Unit of work flowing through a node's processing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeObject {
    pub rid: Rid,
    pub source: KnowledgeSource,
    /// Event type as received.
    pub event_type: Option<EventType>,
    /// Event type decided by this node after checking its cache.
    pub normalized_event_type: Option<EventType>,
    pub manifest: Option<Manifest>,
    pub contents: Option<Value>,
    /// Nodes this object should be delivered to.
    pub network_targets: Vec<NodeRid>,
}

impl KnowledgeObject {
    pub fn from_event(event: Event, source: KnowledgeSource) -> Self {
        Self {
            rid: event.rid,
            source,
            event_type: Some(event.event_type),
            normalized_event_type: None,
            manifest: event.manifest,
            contents: event.contents,
            network_targets: Vec::new(),
        }
    }

    pub fn from_bundle(bundle: Bundle, event_type: EventType, source: KnowledgeSource) -> Self {
        Self {
            rid: bundle.manifest.rid.clone(),
            source,
            event_type: Some(event_type),
            normalized_event_type: None,
            manifest: Some(bundle.manifest),
            contents: Some(bundle.contents),
            network_targets: Vec::new(),
        }
    }

    /// Bundle view, if both manifest and contents are present.
    pub fn bundle(&self) -> Option<Bundle> {
        match (&self.manifest, &self.contents) {
            (Some(manifest), Some(contents)) => Some(Bundle {
                manifest: manifest.clone(),
                contents: contents.clone(),
            }),
            _ => None,
        }
    }

    /// Outgoing event, preferring the normalized event type.
    pub fn to_event(&self) -> Option<Event> {
        let event_type = self.normalized_event_type.or(self.event_type)?;
        Some(Event {
            rid: self.rid.clone(),
            event_type,
            manifest: self.manifest.clone(),
            contents: self.contents.clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Node and Edge Profiles
// ─────────────────────────────────────────────────────────────────

/// Whether a node serves the knowledge-network API itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Reachable at `base_url`; receives broadcasts directly.
    Full,
    /// Not reachable; polls for its events.
    Partial,
}

/// Entity types a node emits events for and serves state of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProvides {
    #[serde(default)]
    pub event: Vec<RidType>,
    #[serde(default)]
    pub state: Vec<RidType>,
}

/// Contents of a node bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    #[serde(default)]
    pub base_url: Option<String>,
    pub node_type: NodeType,
    #[serde(default)]
    pub provides: NodeProvides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Webhook,
    Poll,
}

/// Contents of an edge bundle: `source` publishes events of the listed
/// types to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeProfile {
    pub source: NodeRid,
    pub target: NodeRid,
    pub edge_type: EdgeType,
    pub rid_types: Vec<RidType>,
}

// ─────────────────────────────────────────────────────────────────
// Request / Response Payloads
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsPayload {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollEvents {
    pub rid: NodeRid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRids {
    #[serde(default)]
    pub rid_types: Vec<RidType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RidsPayload {
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchManifests {
    #[serde(default)]
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestsPayload {
    pub manifests: Vec<Manifest>,
    #[serde(default)]
    pub not_found: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchBundles {
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundlesPayload {
    pub bundles: Vec<Bundle>,
    #[serde(default)]
    pub not_found: Vec<Rid>,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentPersonality;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_format() {
        assert_eq!(serde_json::to_string(&EventType::New).unwrap(), "\"NEW\"");
        assert_eq!(serde_json::to_string(&EventType::Update).unwrap(), "\"UPDATE\"");
        assert_eq!(EventType::Update.to_string(), "UPDATE");
    }

    #[test]
    fn test_manifest_hash_tracks_contents() {
        let rid = Rid::from(AgentPersonality::new("weather", "1.0"));
        let a = Manifest::generate(rid.clone(), &json!({"mood": "sunny"})).unwrap();
        let b = Manifest::generate(rid.clone(), &json!({"mood": "sunny"})).unwrap();
        let c = Manifest::generate(rid, &json!({"mood": "rainy"})).unwrap();

        assert_eq!(a.sha256_hash, b.sha256_hash);
        assert_ne!(a.sha256_hash, c.sha256_hash);
        assert_eq!(a.sha256_hash.len(), 64);
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = Event {
            rid: AgentPersonality::new("weather", "1.0").into(),
            event_type: EventType::New,
            manifest: None,
            contents: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"rid": "orn:agent.personality:weather/1.0", "event_type": "NEW"})
        );
    }

    #[test]
    fn test_knowledge_object_prefers_normalized_type() {
        let bundle = Bundle::generate(AgentPersonality::new("a", "1"), json!({})).unwrap();
        let mut kobj = KnowledgeObject::from_bundle(bundle, EventType::New, KnowledgeSource::Local);
        assert_eq!(kobj.to_event().unwrap().event_type, EventType::New);

        kobj.normalized_event_type = Some(EventType::Update);
        let event = kobj.to_event().unwrap();
        assert_eq!(event.event_type, EventType::Update);
        assert!(event.contents.is_some());
    }

    #[test]
    fn test_bundle_requires_contents() {
        let event = Event {
            rid: AgentPersonality::new("a", "1").into(),
            event_type: EventType::New,
            manifest: None,
            contents: Some(json!({})),
        };
        let kobj = KnowledgeObject::from_event(event, KnowledgeSource::External);
        assert!(kobj.bundle().is_none());
    }

    #[test]
    fn test_edge_profile_json() {
        let edge = EdgeProfile {
            source: NodeRid::generate("agent"),
            target: NodeRid::generate("coordinator"),
            edge_type: EdgeType::Poll,
            rid_types: vec![RidType::AgentPersonality],
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["edge_type"], json!("POLL"));
        assert_eq!(value["rid_types"], json!(["orn:agent.personality"]));

        let parsed: EdgeProfile = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, edge);
    }
}
