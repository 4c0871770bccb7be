//! Network interface
//!
//! Delivers processed knowledge to neighbors, holds per-node poll queues
//! for nodes that cannot be reached directly, and answers fetch requests
//! from the local cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::node::cache::Cache;
use crate::node::transport::Transport;
use crate::protocol::{
    Bundle, BundlesPayload, Event, EventType, FetchBundles, FetchManifests, FetchRids,
    KnowledgeObject, ManifestsPayload, NodeProfile, NodeRid, NodeType, Rid, RidsPayload,
};

pub struct NetworkInterface {
    identity: NodeRid,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn Transport>,
    queues: Mutex<HashMap<NodeRid, VecDeque<Event>>>,
    /// Nodes that have already received this node's own bundle on poll.
    greeted: Mutex<HashSet<NodeRid>>,
}

impl NetworkInterface {
    pub fn new(identity: NodeRid, cache: Arc<dyn Cache>, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity,
            cache,
            transport,
            queues: Mutex::new(HashMap::new()),
            greeted: Mutex::new(HashSet::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ─────────────────────────────────────────────────────────────
    // Poll Queues
    // ─────────────────────────────────────────────────────────────

    pub fn push_event_to(&self, target: &NodeRid, event: Event) {
        self.queues
            .lock()
            .entry(target.clone())
            .or_default()
            .push_back(event);
    }

    /// Drain up to `limit` queued events for a node (all when `None`).
    pub fn flush_poll_queue(&self, rid: &NodeRid, limit: Option<usize>) -> Vec<Event> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(rid) else {
            return Vec::new();
        };
        let take = limit.unwrap_or(queue.len()).min(queue.len());
        let events: Vec<Event> = queue.drain(..take).collect();
        if queue.is_empty() {
            queues.remove(rid);
        }
        events
    }

    pub fn queued_for(&self, rid: &NodeRid) -> usize {
        self.queues.lock().get(rid).map_or(0, VecDeque::len)
    }

    /// Answer a poll request.
    ///
    /// The first poll from a given node is answered with this node's own
    /// bundle ahead of any queued events, so the poller learns who it is
    /// talking to.
    pub fn serve_poll(&self, rid: &NodeRid, limit: Option<usize>) -> Result<Vec<Event>> {
        let mut events = Vec::new();

        if rid != &self.identity && self.greeted.lock().insert(rid.clone()) {
            match self.cache.read(&Rid::Node(self.identity.clone()))? {
                Some(bundle) => {
                    info!(node = %rid, "Sending own node bundle to new poller");
                    events.push(Event::from_bundle(EventType::New, bundle));
                }
                None => warn!("Own node bundle missing from cache"),
            }
        }

        events.extend(self.flush_poll_queue(rid, limit));
        Ok(events)
    }

    // ─────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────

    /// Base URL of a node that accepts direct broadcasts.
    pub fn reachable_url(&self, rid: &NodeRid) -> Option<String> {
        let bundle = self.cache.read(&Rid::Node(rid.clone())).ok().flatten()?;
        let profile: NodeProfile = serde_json::from_value(bundle.contents).ok()?;
        match profile.node_type {
            NodeType::Full => profile.base_url,
            NodeType::Partial => None,
        }
    }

    /// Deliver a processed knowledge object to its targets.
    ///
    /// Reachable nodes get a direct broadcast on a background task; failures
    /// are logged and not retried. Everyone else gets the event queued.
    pub fn dispatch(&self, kobj: &KnowledgeObject) {
        let Some(event) = kobj.to_event() else {
            return;
        };

        for target in &kobj.network_targets {
            if target == &self.identity {
                continue;
            }
            match self.reachable_url(target) {
                Some(url) => {
                    let transport = Arc::clone(&self.transport);
                    let event = event.clone();
                    let target = target.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.broadcast_events(&url, vec![event]).await {
                            warn!(target = %target, error = %e, "Broadcast failed");
                        }
                    });
                }
                None => {
                    debug!(target = %target, rid = %event.rid, "Queueing event for poll");
                    self.push_event_to(target, event.clone());
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Fetch Responder
    // ─────────────────────────────────────────────────────────────

    pub fn fetch_rids(&self, req: &FetchRids) -> Result<RidsPayload> {
        let rids = if req.rid_types.is_empty() {
            self.cache.list_rids(None)?
        } else {
            let mut rids = Vec::new();
            for t in &req.rid_types {
                rids.extend(self.cache.list_rids(Some(*t))?);
            }
            rids
        };
        Ok(RidsPayload { rids })
    }

    pub fn fetch_manifests(&self, req: &FetchManifests) -> Result<ManifestsPayload> {
        let rids = if req.rids.is_empty() {
            self.cache.list_rids(None)?
        } else {
            req.rids.clone()
        };

        let mut payload = ManifestsPayload::default();
        for rid in rids {
            match self.cache.read(&rid)? {
                Some(bundle) => payload.manifests.push(bundle.manifest),
                None => payload.not_found.push(rid),
            }
        }
        Ok(payload)
    }

    pub fn fetch_bundles(&self, req: &FetchBundles) -> Result<BundlesPayload> {
        let mut payload = BundlesPayload::default();
        for rid in &req.rids {
            match self.cache.read(rid)? {
                Some(bundle) => payload.bundles.push(bundle),
                None => payload.not_found.push(rid.clone()),
            }
        }
        Ok(payload)
    }

    /// Write this node's own bundle so it can be served to pollers.
    pub fn publish_self(&self, profile: &NodeProfile) -> Result<Bundle> {
        let bundle = Bundle::generate(self.identity.clone(), serde_json::to_value(profile)?)?;
        self.cache.write(&bundle)?;
        Ok(bundle)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
