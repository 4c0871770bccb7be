//! Coordinator node
//!
//! Full node that accepts broadcasts from agents, feeds validated
//! personalities into the registry adapter, queues events for polling
//! agents and answers fetch requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::node::cache::{Cache, FileCache};
use crate::node::identity;
use crate::node::processor::{self, ProcessorHandle, DEFAULT_QUEUE_CAPACITY};
use crate::node::transport::{HttpTransport, Transport};
use crate::node::NodeState;
use crate::personality::PersonalityProfile;
use crate::protocol::{
    Bundle, BundlesPayload, Event, EventsPayload, FetchBundles, FetchManifests, FetchRids,
    KnowledgeObject, KnowledgeSource, ManifestsPayload, NodeProfile, NodeProvides, NodeRid,
    NodeType, PollEvents, Rid, RidType, RidsPayload,
};
use crate::registry::{Registration, RegistryAdapter};

pub struct CoordinatorNode {
    state: Arc<NodeState>,
    processor: ProcessorHandle,
    profile: NodeProfile,
    adapter: Arc<RegistryAdapter>,
}

impl CoordinatorNode {
    /// Create the coordinator and start its processor. Must be called from
    /// within a tokio runtime.
    pub fn new(
        identity: NodeRid,
        base_url: impl Into<String>,
        cache: Arc<dyn Cache>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let adapter = Arc::new(RegistryAdapter::new());
        let state = Arc::new(NodeState::new(
            identity,
            None,
            cache,
            transport,
            Some(Arc::clone(&adapter)),
        )?);
        let (processor, _task) = processor::spawn(Arc::clone(&state), DEFAULT_QUEUE_CAPACITY);

        let all_types = vec![RidType::AgentPersonality, RidType::Node, RidType::Edge];
        let profile = NodeProfile {
            base_url: Some(base_url.into()),
            node_type: NodeType::Full,
            provides: NodeProvides {
                event: all_types.clone(),
                state: all_types,
            },
        };

        Ok(Self {
            state,
            processor,
            profile,
            adapter,
        })
    }

    /// Build the coordinator described by the `[coordinator]` section.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let settings = &config.coordinator;
        let node_dir = config.node_dir(&settings.name);

        let node_rid = identity::load_or_generate(&node_dir, &settings.name)?;
        let cache = Arc::new(FileCache::open(node_dir.join("cache"))?);
        let transport = Arc::new(HttpTransport::new(Duration::from_millis(
            config.network.request_timeout_ms,
        ))?);

        Self::new(node_rid, &settings.base_url, cache, transport)
    }

    pub fn identity(&self) -> &NodeRid {
        &self.state.identity
    }

    pub fn profile(&self) -> &NodeProfile {
        &self.profile
    }

    pub fn adapter(&self) -> &Arc<RegistryAdapter> {
        &self.adapter
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn processor(&self) -> &ProcessorHandle {
        &self.processor
    }

    /// Publish this node's own bundle and restore registry entries for
    /// personalities already in the cache.
    pub async fn start(&self) -> Result<Bundle> {
        let bundle = self.state.network.publish_self(&self.profile)?;
        info!(
            rid = %self.state.identity,
            base_url = ?self.profile.base_url,
            "Coordinator node published"
        );

        let restored = self.restore_registry()?;
        if restored > 0 {
            info!(count = restored, "Restored agents from cache");
        }
        Ok(bundle)
    }

    /// Re-register cached personalities in the order they were first cached,
    /// which is the order they were first registered.
    fn restore_registry(&self) -> Result<usize> {
        let mut restored = 0;
        for rid in self
            .state
            .cache
            .list_rids_by_first_write(Some(RidType::AgentPersonality))?
        {
            let (Rid::Personality(personality), Some(bundle)) = (&rid, self.state.cache.read(&rid)?)
            else {
                continue;
            };
            match PersonalityProfile::from_contents(personality, &bundle.contents) {
                Ok(profile) => {
                    if self.adapter.register(profile) == Registration::Registered {
                        restored += 1;
                    }
                }
                Err(e) => warn!(rid = %rid, error = %e, "Skipping invalid cached personality"),
            }
        }
        Ok(restored)
    }

    // ─────────────────────────────────────────────────────────────
    // Knowledge-Network Endpoints
    // ─────────────────────────────────────────────────────────────

    /// Enqueue broadcast events for processing. Returns the number queued.
    pub async fn handle_broadcast(&self, events: Vec<Event>) -> Result<usize> {
        let count = events.len();
        debug!(count, "Received broadcast");
        for event in events {
            self.processor
                .submit(KnowledgeObject::from_event(event, KnowledgeSource::External))
                .await?;
        }
        Ok(count)
    }

    pub fn poll(&self, req: &PollEvents) -> Result<EventsPayload> {
        let events = self.state.network.serve_poll(&req.rid, req.limit)?;
        debug!(node = %req.rid, count = events.len(), "Served poll");
        Ok(EventsPayload { events })
    }

    pub fn fetch_rids(&self, req: &FetchRids) -> Result<RidsPayload> {
        self.state.network.fetch_rids(req)
    }

    pub fn fetch_manifests(&self, req: &FetchManifests) -> Result<ManifestsPayload> {
        self.state.network.fetch_manifests(req)
    }

    pub fn fetch_bundles(&self, req: &FetchBundles) -> Result<BundlesPayload> {
        self.state.network.fetch_bundles(req)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
