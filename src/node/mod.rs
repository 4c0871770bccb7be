//! Knowledge-network node runtime
//!
//! Shared state for agent and coordinator nodes: identity, cache, neighbor
//! graph, network interface and (coordinator only) the registry adapter.

pub mod agent;
pub mod cache;
pub mod coordinator;
pub mod graph;
pub mod identity;
pub mod network;
pub mod processor;
pub mod transport;

pub use agent::{AgentNode, BootstrapReport};
pub use coordinator::CoordinatorNode;

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{AgentPersonality, NodeRid};
use crate::registry::RegistryAdapter;

use self::cache::Cache;
use self::graph::NetworkGraph;
use self::network::NetworkInterface;
use self::transport::Transport;

/// State owned by one node and written only by its processor task.
pub struct NodeState {
    pub identity: NodeRid,
    /// Personality owned by this node, if it is an agent.
    pub own_personality: Option<AgentPersonality>,
    pub cache: Arc<dyn Cache>,
    pub graph: Arc<NetworkGraph>,
    pub network: Arc<NetworkInterface>,
    pub adapter: Option<Arc<RegistryAdapter>>,
}

impl NodeState {
    /// Assemble node state, rebuilding the graph from edges already cached.
    pub fn new(
        identity: NodeRid,
        own_personality: Option<AgentPersonality>,
        cache: Arc<dyn Cache>,
        transport: Arc<dyn Transport>,
        adapter: Option<Arc<RegistryAdapter>>,
    ) -> Result<Self> {
        let graph = Arc::new(NetworkGraph::load(cache.as_ref())?);
        let network = Arc::new(NetworkInterface::new(
            identity.clone(),
            Arc::clone(&cache),
            transport,
        ));

        Ok(Self {
            identity,
            own_personality,
            cache,
            graph,
            network,
            adapter,
        })
    }
}
