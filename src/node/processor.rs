//! Knowledge processor
//!
//! A single background task consumes knowledge objects strictly in the
//! order they were submitted. It is the only writer of the cache, the
//! network graph and the registry adapter.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handlers::{self, Flow, HandlerContext, StopReason};
use crate::node::NodeState;
use crate::protocol::{
    Bundle, EdgeProfile, EventType, KnowledgeObject, KnowledgeSource, Manifest, NodeProfile,
    NodeRid, Rid, RidType,
};

/// Default depth of the processing queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// What happened to one knowledge object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Dropped(StopReason),
    Stored {
        normalized: EventType,
        targets: Vec<NodeRid>,
    },
}

impl ProcessOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, ProcessOutcome::Stored { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Processor Handle
// ─────────────────────────────────────────────────────────────────

enum Command {
    Process {
        kobj: KnowledgeObject,
        reply: Option<oneshot::Sender<ProcessOutcome>>,
    },
}

/// Cloneable handle for submitting work to the processor.
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::Sender<Command>,
}

impl ProcessorHandle {
    /// Enqueue without waiting for the outcome.
    pub async fn submit(&self, kobj: KnowledgeObject) -> Result<()> {
        self.tx
            .send(Command::Process { kobj, reply: None })
            .await
            .map_err(|_| Error::Internal("Knowledge processor has stopped".into()))
    }

    /// Enqueue and wait until the object has been processed.
    pub async fn submit_and_wait(&self, kobj: KnowledgeObject) -> Result<ProcessOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Process {
                kobj,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| Error::Internal("Knowledge processor has stopped".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::Internal("Knowledge processor dropped the request".into()))
    }
}

/// Start the consumer task. It exits once every handle is dropped.
pub fn spawn(state: Arc<NodeState>, capacity: usize) -> (ProcessorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity);

    let task = tokio::spawn(async move {
        debug!(node = %state.identity, "Knowledge processor started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Process { kobj, reply } => {
                    let outcome = process(&state, kobj);
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
        debug!(node = %state.identity, "Knowledge processor stopped");
    });

    (ProcessorHandle { tx }, task)
}

// ─────────────────────────────────────────────────────────────────
// Processing
// ─────────────────────────────────────────────────────────────────

/// Process one knowledge object to completion.
pub fn process(state: &NodeState, kobj: KnowledgeObject) -> ProcessOutcome {
    debug!(
        rid = %kobj.rid,
        source = %kobj.source,
        event_type = ?kobj.event_type,
        "Processing knowledge object"
    );

    let outcome = match kobj.rid.rid_type() {
        RidType::AgentPersonality => process_personality(state, kobj),
        RidType::Node => process_node(state, kobj),
        RidType::Edge => process_edge(state, kobj),
    };

    if let ProcessOutcome::Dropped(reason) = &outcome {
        debug!(reason = %reason, "Knowledge object dropped");
    }
    outcome
}

fn process_personality(state: &NodeState, kobj: KnowledgeObject) -> ProcessOutcome {
    let ctx = HandlerContext {
        own_node: &state.identity,
        own_personality: state.own_personality.as_ref(),
        cache: state.cache.as_ref(),
        graph: state.graph.as_ref(),
        adapter: state.adapter.as_deref(),
    };

    let mut persist = |kobj: &mut KnowledgeObject| store(state, kobj);
    match handlers::run_pipeline(&ctx, kobj, &mut persist) {
        Flow::Stop(reason) => ProcessOutcome::Dropped(reason),
        Flow::Continue(kobj) => {
            state.network.dispatch(&kobj);
            info!(
                rid = %kobj.rid,
                event_type = ?kobj.normalized_event_type,
                targets = kobj.network_targets.len(),
                "Personality processed"
            );
            ProcessOutcome::Stored {
                normalized: kobj.normalized_event_type.unwrap_or(EventType::New),
                targets: kobj.network_targets,
            }
        }
    }
}

fn process_node(state: &NodeState, mut kobj: KnowledgeObject) -> ProcessOutcome {
    if kobj.source == KnowledgeSource::External && kobj.rid.as_node() == Some(&state.identity) {
        warn!(rid = %kobj.rid, "Blocked external update to own node");
        return ProcessOutcome::Dropped(StopReason::SelfProtection);
    }

    let profile = match parse_contents::<NodeProfile>(&kobj) {
        Ok(profile) => profile,
        Err(reason) => return ProcessOutcome::Dropped(reason),
    };

    if let Err(reason) = normalize(state, &mut kobj).and_then(|_| store(state, &mut kobj)) {
        return ProcessOutcome::Dropped(reason);
    }

    info!(rid = %kobj.rid, node_type = ?profile.node_type, base_url = ?profile.base_url, "Node profile stored");
    stored(kobj)
}

fn process_edge(state: &NodeState, mut kobj: KnowledgeObject) -> ProcessOutcome {
    let profile = match parse_contents::<EdgeProfile>(&kobj) {
        Ok(profile) => profile,
        Err(reason) => return ProcessOutcome::Dropped(reason),
    };

    if let Err(reason) = normalize(state, &mut kobj).and_then(|_| store(state, &mut kobj)) {
        return ProcessOutcome::Dropped(reason);
    }

    if let Rid::Edge(edge_rid) = &kobj.rid {
        info!(
            rid = %kobj.rid,
            source = %profile.source,
            target = %profile.target,
            "Edge stored"
        );
        state.graph.add_edge(edge_rid.clone(), profile);
    }
    stored(kobj)
}

// ─────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────

fn parse_contents<T: serde::de::DeserializeOwned>(
    kobj: &KnowledgeObject,
) -> std::result::Result<T, StopReason> {
    let Some(contents) = kobj.contents.as_ref() else {
        warn!(rid = %kobj.rid, "Event without contents, dropping");
        return Err(StopReason::MissingContents);
    };
    serde_json::from_value(contents.clone()).map_err(|e| {
        warn!(rid = %kobj.rid, error = %e, "Invalid contents");
        StopReason::InvalidContents(e.to_string())
    })
}

fn normalize(state: &NodeState, kobj: &mut KnowledgeObject) -> std::result::Result<(), StopReason> {
    let known = state
        .cache
        .exists(&kobj.rid)
        .map_err(|e| StopReason::Cache(e.to_string()))?;
    kobj.normalized_event_type = Some(if known { EventType::Update } else { EventType::New });
    Ok(())
}

/// Write the object's bundle, generating a manifest if it arrived without one.
fn store(state: &NodeState, kobj: &mut KnowledgeObject) -> std::result::Result<(), StopReason> {
    let Some(contents) = kobj.contents.clone() else {
        return Err(StopReason::MissingContents);
    };

    if kobj.manifest.is_none() {
        let manifest = Manifest::generate(kobj.rid.clone(), &contents)
            .map_err(|e| StopReason::InvalidContents(e.to_string()))?;
        kobj.manifest = Some(manifest);
    }

    let bundle = Bundle {
        manifest: kobj.manifest.clone().ok_or(StopReason::MissingContents)?,
        contents,
    };
    state.cache.write(&bundle).map_err(|e| {
        warn!(rid = %kobj.rid, error = %e, "Cache write failed");
        StopReason::Cache(e.to_string())
    })
}

fn stored(kobj: KnowledgeObject) -> ProcessOutcome {
    ProcessOutcome::Stored {
        normalized: kobj.normalized_event_type.unwrap_or(EventType::New),
        targets: kobj.network_targets,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::cache::MemoryCache;
    use crate::node::graph::NetworkGraph;
    use crate::node::network::NetworkInterface;
    use crate::node::transport::Transport;
    use crate::personality::{PersonalityProfile, PersonalityTrait};
    use crate::protocol::{AgentPersonality, EdgeRid, EdgeType, Event};
    use crate::registry::RegistryAdapter;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn broadcast_events(&self, _url: &str, _events: Vec<Event>) -> Result<()> {
            Ok(())
        }

        async fn poll_events(&self, _url: &str, _rid: &NodeRid) -> Result<Vec<Event>> {
            Ok(Vec::new())
        }
    }

    fn coordinator_state() -> Arc<NodeState> {
        let identity = NodeRid::generate("coordinator");
        let cache: Arc<dyn crate::node::cache::Cache> = Arc::new(MemoryCache::new());
        Arc::new(NodeState {
            network: Arc::new(NetworkInterface::new(
                identity.clone(),
                cache.clone(),
                Arc::new(NullTransport),
            )),
            identity,
            own_personality: None,
            cache,
            graph: Arc::new(NetworkGraph::new()),
            adapter: Some(Arc::new(RegistryAdapter::new())),
        })
    }

    fn weather() -> KnowledgeObject {
        let profile = PersonalityProfile::new(
            AgentPersonality::new("weather", "1.0"),
            NodeRid::generate("weather"),
            "http://127.0.0.1:8100",
            vec![PersonalityTrait::from_value("mood", "sunny", "", true)],
        );
        let bundle = Bundle::generate(profile.rid().clone(), profile.to_contents().unwrap()).unwrap();
        KnowledgeObject::from_bundle(bundle, EventType::New, KnowledgeSource::External)
    }

    #[tokio::test]
    async fn test_personality_stored_then_updated() {
        let state = coordinator_state();
        let (handle, _task) = spawn(state.clone(), 8);

        let first = handle.submit_and_wait(weather()).await.unwrap();
        assert_eq!(first, ProcessOutcome::Stored { normalized: EventType::New, targets: vec![] });

        let second = handle.submit_and_wait(weather()).await.unwrap();
        assert!(matches!(second, ProcessOutcome::Stored { normalized: EventType::Update, .. }));

        let adapter = state.adapter.as_ref().unwrap();
        assert_eq!(adapter.len(), 1);
        assert_eq!(adapter.get_all_tools()[0].name, "weather.mood");
    }

    #[tokio::test]
    async fn test_submissions_processed_in_order() {
        let state = coordinator_state();
        let (handle, _task) = spawn(state.clone(), 8);

        for name in ["c", "a", "b"] {
            let profile = PersonalityProfile::new(
                AgentPersonality::new(name, "1.0"),
                NodeRid::generate(name),
                "http://127.0.0.1:8100",
                vec![],
            );
            let bundle = Bundle::generate(profile.rid().clone(), profile.to_contents().unwrap()).unwrap();
            handle
                .submit(KnowledgeObject::from_bundle(bundle, EventType::New, KnowledgeSource::External))
                .await
                .unwrap();
        }
        // waiting on a later submission means every earlier one is done
        handle.submit_and_wait(weather()).await.unwrap();

        let ids: Vec<String> = state
            .adapter
            .as_ref()
            .unwrap()
            .list_resources()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["agent:c", "agent:a", "agent:b", "agent:weather"]);
    }

    #[tokio::test]
    async fn test_invalid_personality_not_cached() {
        let state = coordinator_state();
        let mut kobj = weather();
        kobj.contents = Some(json!({"invalid": "data"}));
        let rid = kobj.rid.clone();

        let outcome = process(&state, kobj);
        assert!(matches!(outcome, ProcessOutcome::Dropped(StopReason::InvalidContents(_))));
        assert!(!state.cache.exists(&rid).unwrap());
        assert!(state.adapter.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_generated_when_missing() {
        let state = coordinator_state();
        let mut kobj = weather();
        kobj.manifest = None;
        let rid = kobj.rid.clone();

        assert!(process(&state, kobj).is_stored());
        assert!(state.cache.read(&rid).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_edge_updates_graph() {
        let state = coordinator_state();
        let agent = NodeRid::generate("agent");
        let profile = EdgeProfile {
            source: agent.clone(),
            target: state.identity.clone(),
            edge_type: EdgeType::Poll,
            rid_types: vec![RidType::AgentPersonality],
        };
        let bundle = Bundle::generate(
            EdgeRid::between(&agent, &state.identity),
            serde_json::to_value(&profile).unwrap(),
        )
        .unwrap();

        let outcome = process(
            &state,
            KnowledgeObject::from_bundle(bundle, EventType::New, KnowledgeSource::External),
        );
        assert!(outcome.is_stored());
        assert_eq!(state.graph.neighbors(&state.identity, None, None), vec![agent]);
    }

    #[tokio::test]
    async fn test_external_update_to_own_node_blocked() {
        let state = coordinator_state();
        let contents = json!({"base_url": null, "node_type": "PARTIAL"});
        let bundle = Bundle::generate(state.identity.clone(), contents).unwrap();

        let outcome = process(
            &state,
            KnowledgeObject::from_bundle(bundle, EventType::Update, KnowledgeSource::External),
        );
        assert_eq!(outcome, ProcessOutcome::Dropped(StopReason::SelfProtection));
    }

    #[tokio::test]
    async fn test_node_profile_stored() {
        let state = coordinator_state();
        let peer = NodeRid::generate("peer");
        let contents = json!({"base_url": "http://127.0.0.1:7000", "node_type": "FULL"});
        let bundle = Bundle::generate(peer.clone(), contents).unwrap();

        let outcome = process(
            &state,
            KnowledgeObject::from_bundle(bundle, EventType::New, KnowledgeSource::External),
        );
        assert!(outcome.is_stored());
        assert_eq!(state.network.reachable_url(&peer).as_deref(), Some("http://127.0.0.1:7000"));
    }
}
