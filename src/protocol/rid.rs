//! Resource identifiers (RIDs)
//!
//! Every knowledge object on the network is addressed by a namespaced,
//! stringifiable reference of the form `orn:<namespace>:<reference>`.
//!
//! - `orn:agent.personality:<name>/<version>`: an agent personality
//! - `orn:koi-net.node:<name>+<uuid>`: a network node
//! - `orn:koi-net.edge:<hex>`: a subscription edge between two nodes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

const ORN_SCHEME: &str = "orn";

// ─────────────────────────────────────────────────────────────────
// RID Type
// ─────────────────────────────────────────────────────────────────

/// The kind of entity a RID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RidType {
    #[serde(rename = "orn:agent.personality")]
    AgentPersonality,
    #[serde(rename = "orn:koi-net.node")]
    Node,
    #[serde(rename = "orn:koi-net.edge")]
    Edge,
}

impl RidType {
    /// Namespace segment of the canonical form.
    pub fn namespace(&self) -> &'static str {
        match self {
            RidType::AgentPersonality => "agent.personality",
            RidType::Node => "koi-net.node",
            RidType::Edge => "koi-net.edge",
        }
    }

    /// Canonical type prefix, e.g. `orn:agent.personality`.
    pub fn prefix(&self) -> String {
        format!("{}:{}", ORN_SCHEME, self.namespace())
    }

    fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "agent.personality" => Some(RidType::AgentPersonality),
            "koi-net.node" => Some(RidType::Node),
            "koi-net.edge" => Some(RidType::Edge),
            _ => None,
        }
    }
}

impl fmt::Display for RidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Split `orn:<namespace>:<reference>` into its namespace and reference.
fn split_canonical(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix(ORN_SCHEME)?.strip_prefix(':')?;
    rest.split_once(':')
}

// ─────────────────────────────────────────────────────────────────
// Agent Personality
// ─────────────────────────────────────────────────────────────────

/// Identity of a versioned agent personality.
///
/// Two identities are equal iff both name and version match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentPersonality {
    pub name: String,
    pub version: String,
}

impl AgentPersonality {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The `<name>/<version>` part of the canonical form.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// Parse a bare `<name>/<version>` reference.
    pub fn from_reference(reference: &str) -> Result<Self> {
        let components: Vec<&str> = reference.split('/').collect();
        match components.as_slice() {
            [name, version] if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(*name, *version))
            }
            _ => Err(Error::rid_format(
                "agent personality",
                reference,
                "reference must contain '<name>/<version>'",
            )),
        }
    }
}

impl fmt::Display for AgentPersonality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", RidType::AgentPersonality.prefix(), self.reference())
    }
}

impl FromStr for AgentPersonality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match split_canonical(s) {
            Some((ns, reference)) if ns == RidType::AgentPersonality.namespace() => {
                Self::from_reference(reference)
            }
            _ => Err(Error::rid_format(
                "agent personality",
                s,
                "expected 'orn:agent.personality:<name>/<version>'",
            )),
        }
    }
}

impl TryFrom<String> for AgentPersonality {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AgentPersonality> for String {
    fn from(rid: AgentPersonality) -> Self {
        rid.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────
// Node RID
// ─────────────────────────────────────────────────────────────────

/// Network identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeRid {
    pub name: String,
    pub uuid: Uuid,
}

impl NodeRid {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }

    /// Generate a fresh identity for a node name.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(name, Uuid::new_v4())
    }

    pub fn reference(&self) -> String {
        format!("{}+{}", self.name, self.uuid)
    }
}

impl fmt::Display for NodeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", RidType::Node.prefix(), self.reference())
    }
}

impl FromStr for NodeRid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let reference = match split_canonical(s) {
            Some((ns, reference)) if ns == RidType::Node.namespace() => reference,
            _ => {
                return Err(Error::rid_format(
                    "node",
                    s,
                    "expected 'orn:koi-net.node:<name>+<uuid>'",
                ))
            }
        };

        let (name, uuid) = reference
            .rsplit_once('+')
            .ok_or_else(|| Error::rid_format("node", s, "missing '+<uuid>' suffix"))?;
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| Error::rid_format("node", s, format!("invalid uuid: {}", e)))?;

        Ok(Self::new(name, uuid))
    }
}

impl TryFrom<String> for NodeRid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeRid> for String {
    fn from(rid: NodeRid) -> Self {
        rid.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────
// Edge RID
// ─────────────────────────────────────────────────────────────────

/// Identity of a directed subscription edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EdgeRid {
    pub id: String,
}

impl EdgeRid {
    /// Deterministic edge id for a (source, target) pair.
    pub fn between(source: &NodeRid, target: &NodeRid) -> Self {
        let digest = Sha256::digest(format!("{}->{}", source, target).as_bytes());
        Self {
            id: hex::encode(&digest[..16]),
        }
    }
}

impl fmt::Display for EdgeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", RidType::Edge.prefix(), self.id)
    }
}

impl FromStr for EdgeRid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match split_canonical(s) {
            Some((ns, id)) if ns == RidType::Edge.namespace() && !id.is_empty() => Ok(Self {
                id: id.to_string(),
            }),
            _ => Err(Error::rid_format("edge", s, "expected 'orn:koi-net.edge:<id>'")),
        }
    }
}

impl TryFrom<String> for EdgeRid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EdgeRid> for String {
    fn from(rid: EdgeRid) -> Self {
        rid.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────
// Any RID
// ─────────────────────────────────────────────────────────────────

/// Any identifier that can flow through the knowledge pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rid {
    Personality(AgentPersonality),
    Node(NodeRid),
    Edge(EdgeRid),
}

impl Rid {
    pub fn rid_type(&self) -> RidType {
        match self {
            Rid::Personality(_) => RidType::AgentPersonality,
            Rid::Node(_) => RidType::Node,
            Rid::Edge(_) => RidType::Edge,
        }
    }

    pub fn as_personality(&self) -> Option<&AgentPersonality> {
        match self {
            Rid::Personality(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeRid> {
        match self {
            Rid::Node(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rid::Personality(p) => p.fmt(f),
            Rid::Node(n) => n.fmt(f),
            Rid::Edge(e) => e.fmt(f),
        }
    }
}

impl FromStr for Rid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let namespace = split_canonical(s)
            .map(|(ns, _)| ns)
            .ok_or_else(|| Error::rid_format("rid", s, "expected 'orn:<namespace>:<reference>'"))?;

        match RidType::from_namespace(namespace) {
            Some(RidType::AgentPersonality) => s.parse().map(Rid::Personality),
            Some(RidType::Node) => s.parse().map(Rid::Node),
            Some(RidType::Edge) => s.parse().map(Rid::Edge),
            None => Err(Error::rid_format(
                "rid",
                s,
                format!("unknown namespace '{}'", namespace),
            )),
        }
    }
}

impl TryFrom<String> for Rid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Rid> for String {
    fn from(rid: Rid) -> Self {
        rid.to_string()
    }
}

impl From<AgentPersonality> for Rid {
    fn from(rid: AgentPersonality) -> Self {
        Rid::Personality(rid)
    }
}

impl From<NodeRid> for Rid {
    fn from(rid: NodeRid) -> Self {
        Rid::Node(rid)
    }
}

impl From<EdgeRid> for Rid {
    fn from(rid: EdgeRid) -> Self {
        Rid::Edge(rid)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
