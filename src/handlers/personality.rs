//! Personality handler stages
//!
//! Every personality-typed knowledge object passes through three stages in
//! order, whether it was produced locally or received from a peer:
//!
//! 1. [`guard_identity`]: a node is the only writer of its own personality.
//! 2. [`validate_bundle`]: contents must parse as a profile and must not
//!    claim a name another node already owns; the event is normalized to NEW
//!    or UPDATE, persisted, then handed to the registry if one is attached.
//! 3. [`select_targets`]: computes which neighbors should receive it.

use crate::node::cache::Cache;
use crate::node::graph::{Direction, NetworkGraph};
use crate::personality::PersonalityProfile;
use crate::protocol::{AgentPersonality, EventType, KnowledgeObject, KnowledgeSource, NodeRid, RidType};
use crate::registry::{Registration, RegistryAdapter};

use super::{Flow, StopReason};

/// Node state visible to the stages.
pub struct HandlerContext<'a> {
    pub own_node: &'a NodeRid,
    /// Personality owned by this node, if any.
    pub own_personality: Option<&'a AgentPersonality>,
    pub cache: &'a dyn Cache,
    pub graph: &'a NetworkGraph,
    /// Present on the coordinator only.
    pub adapter: Option<&'a RegistryAdapter>,
}

impl HandlerContext<'_> {
    fn is_own(&self, kobj: &KnowledgeObject) -> bool {
        match (self.own_personality, kobj.rid.as_personality()) {
            (Some(own), Some(rid)) => own == rid,
            _ => false,
        }
    }
}

/// Durable write of an accepted object, run inside Stage B.
pub type Persist<'p> = dyn FnMut(&mut KnowledgeObject) -> Result<(), StopReason> + 'p;

/// Run all stages in order.
pub fn run_pipeline(ctx: &HandlerContext<'_>, kobj: KnowledgeObject, persist: &mut Persist<'_>) -> Flow {
    guard_identity(ctx, kobj)
        .and_then(|kobj| validate_bundle(ctx, kobj, persist))
        .and_then(|kobj| select_targets(ctx, kobj))
}

// ─────────────────────────────────────────────────────────────────
// Stage A: Identity Guard
// ─────────────────────────────────────────────────────────────────

/// Reject external updates to this node's own personality.
pub fn guard_identity(ctx: &HandlerContext<'_>, kobj: KnowledgeObject) -> Flow {
    if kobj.source == KnowledgeSource::External && ctx.is_own(&kobj) {
        tracing::warn!(rid = %kobj.rid, source = %kobj.source, "Blocked external update to own personality");
        return Flow::Stop(StopReason::SelfProtection);
    }

    tracing::debug!(rid = %kobj.rid, source = %kobj.source, "Processing agent personality");
    Flow::Continue(kobj)
}

// ─────────────────────────────────────────────────────────────────
// Stage B: Content Validation
// ─────────────────────────────────────────────────────────────────

/// Validate contents, normalize the event type, persist, and register with
/// the adapter if attached.
///
/// With an adapter attached, a profile whose name is registered to another
/// node stops here, so neither the cache nor the registry ever holds it.
/// Registration happens only after `persist` succeeds.
pub fn validate_bundle(
    ctx: &HandlerContext<'_>,
    mut kobj: KnowledgeObject,
    persist: &mut Persist<'_>,
) -> Flow {
    let Some(rid) = kobj.rid.as_personality() else {
        return Flow::Stop(StopReason::WrongType(kobj.rid.rid_type()));
    };
    let Some(contents) = kobj.contents.as_ref() else {
        tracing::warn!(rid = %kobj.rid, "Personality event without contents, dropping");
        return Flow::Stop(StopReason::MissingContents);
    };

    let profile = match PersonalityProfile::from_contents(rid, contents) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::error!(rid = %kobj.rid, error = %e, "Invalid personality profile");
            return Flow::Stop(StopReason::InvalidContents(e.to_string()));
        }
    };

    if let Some(owner) = ctx.adapter.and_then(|a| a.owner_of(profile.name())) {
        if &owner != profile.node_rid() {
            tracing::warn!(
                rid = %kobj.rid,
                existing = %owner,
                incoming = %profile.node_rid(),
                "Personality name owned by another node, dropping"
            );
            return Flow::Stop(StopReason::Conflict { existing: owner });
        }
    }

    let known = match ctx.cache.exists(&kobj.rid) {
        Ok(known) => known,
        Err(e) => {
            tracing::error!(rid = %kobj.rid, error = %e, "Cache lookup failed");
            return Flow::Stop(StopReason::Cache(e.to_string()));
        }
    };

    let normalized = if known { EventType::Update } else { EventType::New };
    kobj.normalized_event_type = Some(normalized);

    if let Err(reason) = persist(&mut kobj) {
        return Flow::Stop(reason);
    }
    tracing::info!(rid = %kobj.rid, event_type = %normalized, "Accepted agent personality");

    if let Some(adapter) = ctx.adapter {
        if let Registration::Conflict { existing, incoming } = adapter.register(profile) {
            // Only reachable if something other than the processor registers
            tracing::error!(
                rid = %kobj.rid,
                existing = %existing,
                incoming = %incoming,
                "Cached personality disagrees with registry owner"
            );
        }
    }

    Flow::Continue(kobj)
}

// ─────────────────────────────────────────────────────────────────
// Stage C: Network Fan-out
// ─────────────────────────────────────────────────────────────────

/// Attach delivery targets: neighbors subscribed to personalities, widened
/// to every neighbor for this node's own personality.
pub fn select_targets(ctx: &HandlerContext<'_>, mut kobj: KnowledgeObject) -> Flow {
    let mut targets = ctx.graph.neighbors(
        ctx.own_node,
        Some(Direction::Out),
        Some(RidType::AgentPersonality),
    );

    if ctx.is_own(&kobj) {
        for neighbor in ctx.graph.neighbors(ctx.own_node, None, None) {
            if !targets.contains(&neighbor) {
                targets.push(neighbor);
            }
        }
    }

    for target in targets {
        if !kobj.network_targets.contains(&target) {
            kobj.network_targets.push(target);
        }
    }

    tracing::debug!(rid = %kobj.rid, targets = kobj.network_targets.len(), "Selected network targets");
    Flow::Continue(kobj)
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::cache::MemoryCache;
    use crate::personality::PersonalityTrait;
    use crate::protocol::{Bundle, EdgeProfile, EdgeRid, EdgeType};
    use serde_json::json;

    struct Fixture {
        node: NodeRid,
        cache: MemoryCache,
        graph: NetworkGraph,
        adapter: RegistryAdapter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                node: NodeRid::generate("coordinator"),
                cache: MemoryCache::new(),
                graph: NetworkGraph::new(),
                adapter: RegistryAdapter::new(),
            }
        }

        fn ctx<'a>(&'a self, own: Option<&'a AgentPersonality>) -> HandlerContext<'a> {
            HandlerContext {
                own_node: &self.node,
                own_personality: own,
                cache: &self.cache,
                graph: &self.graph,
                adapter: Some(&self.adapter),
            }
        }

        fn subscribe(&self, subscriber: &NodeRid, types: Vec<RidType>) {
            self.graph.add_edge(
                EdgeRid::between(&self.node, subscriber),
                EdgeProfile {
                    source: self.node.clone(),
                    target: subscriber.clone(),
                    edge_type: EdgeType::Poll,
                    rid_types: types,
                },
            );
        }
    }

    fn weather_bundle() -> Bundle {
        let profile = PersonalityProfile::new(
            AgentPersonality::new("weather", "1.0"),
            NodeRid::generate("weather"),
            "http://127.0.0.1:8100",
            vec![PersonalityTrait::from_value("mood", "sunny", "", true)],
        );
        Bundle::generate(profile.rid().clone(), profile.to_contents().unwrap()).unwrap()
    }

    fn kobj(bundle: Bundle, source: KnowledgeSource) -> KnowledgeObject {
        KnowledgeObject::from_bundle(bundle, EventType::New, source)
    }

    fn accept(_: &mut KnowledgeObject) -> Result<(), StopReason> {
        Ok(())
    }

    fn profile_bundle(node: &NodeRid, mood: &str) -> Bundle {
        let profile = PersonalityProfile::new(
            AgentPersonality::new("weather", "1.0"),
            node.clone(),
            "http://127.0.0.1:8100",
            vec![PersonalityTrait::from_value("mood", mood, "", true)],
        );
        Bundle::generate(profile.rid().clone(), profile.to_contents().unwrap()).unwrap()
    }

    #[test]
    fn test_guard_blocks_external_update_to_own_personality() {
        let fx = Fixture::new();
        let own = AgentPersonality::new("weather", "1.0");

        let flow = guard_identity(&fx.ctx(Some(&own)), kobj(weather_bundle(), KnowledgeSource::External));
        assert_eq!(flow.stop_reason(), Some(&StopReason::SelfProtection));
    }

    #[test]
    fn test_guard_blocks_even_invalid_contents() {
        let fx = Fixture::new();
        let own = AgentPersonality::new("weather", "1.0");
        let mut k = kobj(weather_bundle(), KnowledgeSource::External);
        k.contents = Some(json!({"invalid": "data"}));

        let flow = run_pipeline(&fx.ctx(Some(&own)), k, &mut accept);
        assert_eq!(flow.stop_reason(), Some(&StopReason::SelfProtection));
        assert!(fx.adapter.is_empty());
    }

    #[test]
    fn test_guard_allows_local_and_foreign() {
        let fx = Fixture::new();
        let own = AgentPersonality::new("weather", "1.0");
        assert!(guard_identity(&fx.ctx(Some(&own)), kobj(weather_bundle(), KnowledgeSource::Local)).is_continue());

        let other = AgentPersonality::new("weather", "2.0");
        assert!(guard_identity(&fx.ctx(Some(&other)), kobj(weather_bundle(), KnowledgeSource::External)).is_continue());
        assert!(guard_identity(&fx.ctx(None), kobj(weather_bundle(), KnowledgeSource::External)).is_continue());
    }

    #[test]
    fn test_invalid_contents_never_reach_adapter() {
        let fx = Fixture::new();
        let mut k = kobj(weather_bundle(), KnowledgeSource::External);
        k.contents = Some(json!({"invalid": "data"}));

        let flow = validate_bundle(&fx.ctx(None), k, &mut accept);
        assert!(matches!(flow.stop_reason(), Some(StopReason::InvalidContents(_))));
        assert!(fx.adapter.is_empty());
    }

    #[test]
    fn test_missing_contents_dropped() {
        let fx = Fixture::new();
        let mut k = kobj(weather_bundle(), KnowledgeSource::External);
        k.contents = None;

        assert_eq!(validate_bundle(&fx.ctx(None), k, &mut accept).stop_reason(), Some(&StopReason::MissingContents));
    }

    #[test]
    fn test_normalizes_new_then_update() {
        let fx = Fixture::new();
        let bundle = weather_bundle();

        let first = validate_bundle(&fx.ctx(None), kobj(bundle.clone(), KnowledgeSource::External), &mut accept);
        assert_eq!(first.into_continue().unwrap().normalized_event_type, Some(EventType::New));

        fx.cache.write(&bundle).unwrap();
        let second = validate_bundle(&fx.ctx(None), kobj(bundle, KnowledgeSource::External), &mut accept);
        assert_eq!(second.into_continue().unwrap().normalized_event_type, Some(EventType::Update));
    }

    #[test]
    fn test_registering_twice_keeps_one_entry() {
        let fx = Fixture::new();
        let bundle = weather_bundle();
        for _ in 0..2 {
            assert!(validate_bundle(&fx.ctx(None), kobj(bundle.clone(), KnowledgeSource::External), &mut accept).is_continue());
        }
        assert_eq!(fx.adapter.len(), 1);
    }

    #[test]
    fn test_targets_are_personality_subscribers() {
        let fx = Fixture::new();
        let subscriber = NodeRid::generate("dashboard");
        let unrelated = NodeRid::generate("other");
        fx.subscribe(&subscriber, vec![RidType::AgentPersonality]);
        fx.subscribe(&unrelated, vec![RidType::Node]);

        let flow = select_targets(&fx.ctx(None), kobj(weather_bundle(), KnowledgeSource::External));
        assert_eq!(flow.into_continue().unwrap().network_targets, vec![subscriber]);
    }

    #[test]
    fn test_own_personality_goes_to_every_neighbor() {
        let fx = Fixture::new();
        let own = AgentPersonality::new("weather", "1.0");
        let subscriber = NodeRid::generate("dashboard");
        let unrelated = NodeRid::generate("other");
        fx.subscribe(&subscriber, vec![RidType::AgentPersonality]);
        fx.subscribe(&unrelated, vec![RidType::Node]);

        let flow = select_targets(&fx.ctx(Some(&own)), kobj(weather_bundle(), KnowledgeSource::Local));
        let targets = flow.into_continue().unwrap().network_targets;
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&subscriber));
        assert!(targets.contains(&unrelated));
    }

    #[test]
    fn test_conflicting_owner_is_neither_persisted_nor_registered() {
        let fx = Fixture::new();
        let first = NodeRid::generate("weather");
        let impostor = NodeRid::generate("impostor");
        let mut written = Vec::new();
        let mut record = |k: &mut KnowledgeObject| -> Result<(), StopReason> {
            written.push(k.contents.clone());
            Ok(())
        };

        let flow = validate_bundle(
            &fx.ctx(None),
            kobj(profile_bundle(&first, "sunny"), KnowledgeSource::External),
            &mut record,
        );
        assert!(flow.is_continue());

        let flow = validate_bundle(
            &fx.ctx(None),
            kobj(profile_bundle(&impostor, "rainy"), KnowledgeSource::External),
            &mut record,
        );
        assert_eq!(
            flow.stop_reason(),
            Some(&StopReason::Conflict {
                existing: first.clone()
            })
        );

        assert_eq!(written.len(), 1);
        assert_eq!(fx.adapter.owner_of("weather"), Some(first));
    }

    #[test]
    fn test_failed_persist_leaves_registry_untouched() {
        let fx = Fixture::new();
        let mut failing =
            |_: &mut KnowledgeObject| -> Result<(), StopReason> { Err(StopReason::Cache("disk full".into())) };

        let flow = validate_bundle(
            &fx.ctx(None),
            kobj(weather_bundle(), KnowledgeSource::External),
            &mut failing,
        );
        assert_eq!(flow.stop_reason(), Some(&StopReason::Cache("disk full".into())));
        assert!(fx.adapter.is_empty());
    }
}
