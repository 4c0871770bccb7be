//! Network graph of subscription edges
//!
//! An edge runs from the publishing node (`source`) to the subscribing node
//! (`target`) for the RID types it lists. A node's outbound neighbors are
//! the targets of its edges; its inbound neighbors are the sources of edges
//! pointing at it.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::node::cache::Cache;
use crate::protocol::{EdgeProfile, EdgeRid, NodeRid, Rid, RidType};

/// Direction of an edge relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges along which this node pushes events.
    Out,
    /// Edges along which this node receives events.
    In,
}

#[derive(Default)]
pub struct NetworkGraph {
    edges: RwLock<BTreeMap<EdgeRid, EdgeProfile>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the edge bundles currently in a cache.
    pub fn load(cache: &dyn Cache) -> Result<Self> {
        let graph = Self::new();
        for rid in cache.list_rids(Some(RidType::Edge))? {
            let (Rid::Edge(edge_rid), Some(bundle)) = (&rid, cache.read(&rid)?) else {
                continue;
            };
            match serde_json::from_value::<EdgeProfile>(bundle.contents) {
                Ok(profile) => graph.add_edge(edge_rid.clone(), profile),
                Err(e) => tracing::warn!(rid = %rid, error = %e, "Ignoring malformed cached edge"),
            }
        }
        Ok(graph)
    }

    pub fn add_edge(&self, rid: EdgeRid, profile: EdgeProfile) {
        self.edges.write().insert(rid, profile);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }

    /// Neighbors of `own`, deduplicated in first-seen order.
    ///
    /// `None` direction includes both. When `allowed_type` is set, only
    /// edges carrying that type are considered.
    pub fn neighbors(
        &self,
        own: &NodeRid,
        direction: Option<Direction>,
        allowed_type: Option<RidType>,
    ) -> Vec<NodeRid> {
        let edges = self.edges.read();
        let mut found: Vec<NodeRid> = Vec::new();

        for edge in edges.values() {
            if let Some(t) = allowed_type {
                if !edge.rid_types.contains(&t) {
                    continue;
                }
            }

            let neighbor = if &edge.source == own && direction != Some(Direction::In) {
                &edge.target
            } else if &edge.target == own && direction != Some(Direction::Out) {
                &edge.source
            } else {
                continue;
            };

            if !found.contains(neighbor) {
                found.push(neighbor.clone());
            }
        }
        found
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::cache::MemoryCache;
    use crate::protocol::{Bundle, EdgeType};

    fn edge(source: &NodeRid, target: &NodeRid, types: Vec<RidType>) -> (EdgeRid, EdgeProfile) {
        (
            EdgeRid::between(source, target),
            EdgeProfile {
                source: source.clone(),
                target: target.clone(),
                edge_type: EdgeType::Poll,
                rid_types: types,
            },
        )
    }

    #[test]
    fn test_neighbors_by_direction() {
        let coordinator = NodeRid::generate("coordinator");
        let agent = NodeRid::generate("agent");
        let graph = NetworkGraph::new();
        let (rid, profile) = edge(&agent, &coordinator, vec![RidType::AgentPersonality]);
        graph.add_edge(rid, profile);

        assert_eq!(
            graph.neighbors(&agent, Some(Direction::Out), None),
            vec![coordinator.clone()]
        );
        assert!(graph.neighbors(&agent, Some(Direction::In), None).is_empty());
        assert_eq!(
            graph.neighbors(&coordinator, Some(Direction::In), None),
            vec![agent.clone()]
        );
        assert!(graph.neighbors(&coordinator, Some(Direction::Out), None).is_empty());
        assert_eq!(graph.neighbors(&coordinator, None, None), vec![agent]);
    }

    #[test]
    fn test_neighbors_filtered_by_type() {
        let coordinator = NodeRid::generate("coordinator");
        let a = NodeRid::generate("a");
        let b = NodeRid::generate("b");
        let graph = NetworkGraph::new();
        for (rid, profile) in [
            edge(&coordinator, &a, vec![RidType::AgentPersonality]),
            edge(&coordinator, &b, vec![RidType::Node]),
        ] {
            graph.add_edge(rid, profile);
        }

        let subscribed = graph.neighbors(
            &coordinator,
            Some(Direction::Out),
            Some(RidType::AgentPersonality),
        );
        assert_eq!(subscribed, vec![a]);
        assert_eq!(graph.neighbors(&coordinator, None, None).len(), 2);
    }

    #[test]
    fn test_duplicate_edges_yield_one_neighbor() {
        let coordinator = NodeRid::generate("coordinator");
        let agent = NodeRid::generate("agent");
        let graph = NetworkGraph::new();
        let (rid, profile) = edge(&agent, &coordinator, vec![RidType::AgentPersonality]);
        graph.add_edge(rid.clone(), profile.clone());
        graph.add_edge(rid, profile.clone());
        let (_, reverse) = edge(&coordinator, &agent, vec![RidType::AgentPersonality]);
        graph.add_edge(EdgeRid::between(&coordinator, &agent), reverse);

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.neighbors(&coordinator, None, None), vec![agent]);
    }

    #[test]
    fn test_load_from_cache() {
        let cache = MemoryCache::new();
        let coordinator = NodeRid::generate("coordinator");
        let agent = NodeRid::generate("agent");
        let (rid, profile) = edge(&agent, &coordinator, vec![RidType::AgentPersonality]);
        cache
            .write(&Bundle::generate(rid, serde_json::to_value(&profile).unwrap()).unwrap())
            .unwrap();

        let graph = NetworkGraph::load(&cache).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }
}
