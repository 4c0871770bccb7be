//! Agent node
//!
//! Owns one personality. At start-up the agent announces the personality
//! locally, pushes it to its first-contact coordinator, discovers the
//! coordinator's identity by polling, and establishes a subscription edge.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::node::cache::{Cache, FileCache};
use crate::node::identity;
use crate::node::processor::{self, ProcessOutcome, ProcessorHandle, DEFAULT_QUEUE_CAPACITY};
use crate::node::transport::{HttpTransport, RetryPolicy, Transport};
use crate::node::NodeState;
use crate::personality::{PersonalityProfile, TraitValue};
use crate::protocol::{
    AgentPersonality, Bundle, EdgeProfile, EdgeRid, EdgeType, Event, EventType, KnowledgeObject,
    KnowledgeSource, NodeProfile, NodeProvides, NodeRid, NodeType, Rid, RidType,
};

/// What the start-up handshake achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// The personality passed the local pipeline.
    pub announced: bool,
    /// Coordinator identity discovered by polling first contact.
    pub coordinator: Option<NodeRid>,
    /// Subscription edge to the coordinator.
    pub edge: Option<EdgeRid>,
}

pub struct AgentNode {
    state: Arc<NodeState>,
    processor: ProcessorHandle,
    profile: Arc<RwLock<PersonalityProfile>>,
    first_contact: Option<String>,
    retry: RetryPolicy,
}

impl AgentNode {
    /// Create the agent and start its processor. Must be called from
    /// within a tokio runtime.
    pub fn new(
        profile: PersonalityProfile,
        cache: Arc<dyn Cache>,
        transport: Arc<dyn Transport>,
        first_contact: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let state = Arc::new(NodeState::new(
            profile.node_rid().clone(),
            Some(profile.rid().clone()),
            cache,
            transport,
            None,
        )?);
        let (processor, _task) = processor::spawn(Arc::clone(&state), DEFAULT_QUEUE_CAPACITY);

        Ok(Self {
            state,
            processor,
            profile: Arc::new(RwLock::new(profile)),
            first_contact,
            retry,
        })
    }

    /// Build the agent described by the `[agent]` and `[network]` sections.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let settings = &config.agent;
        let node_dir = config.node_dir(&settings.name);

        let node_rid = identity::load_or_generate(&node_dir, &settings.name)?;
        let cache = Arc::new(FileCache::open(node_dir.join("cache"))?);
        let transport = Arc::new(HttpTransport::new(Duration::from_millis(
            config.network.request_timeout_ms,
        ))?);

        let profile = PersonalityProfile::new(
            AgentPersonality::new(&settings.name, &settings.version),
            node_rid,
            &settings.base_url,
            settings.personality_traits(),
        );
        info!(
            rid = %profile.rid(),
            traits = profile.traits().len(),
            callable = profile.callable_traits().count(),
            "Agent personality loaded"
        );

        Self::new(
            profile,
            cache,
            transport,
            config.network.first_contact.clone(),
            RetryPolicy::from(&config.network.retry),
        )
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn identity(&self) -> &NodeRid {
        &self.state.identity
    }

    pub fn personality(&self) -> AgentPersonality {
        self.profile.read().rid().clone()
    }

    /// Shared profile, read by the tool server.
    pub fn profile(&self) -> Arc<RwLock<PersonalityProfile>> {
        Arc::clone(&self.profile)
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn processor(&self) -> &ProcessorHandle {
        &self.processor
    }

    // ─────────────────────────────────────────────────────────────
    // Bootstrap
    // ─────────────────────────────────────────────────────────────

    /// Run the start-up handshake.
    ///
    /// Transport failures are logged and leave the agent running without a
    /// coordinator edge; only local failures are returned as errors.
    pub async fn start(&self) -> Result<BootstrapReport> {
        self.state.network.publish_self(&NodeProfile {
            base_url: None,
            node_type: NodeType::Partial,
            provides: NodeProvides {
                event: vec![RidType::AgentPersonality],
                state: vec![RidType::AgentPersonality],
            },
        })?;

        let bundle = self.personality_bundle()?;
        let outcome = self
            .processor
            .submit_and_wait(KnowledgeObject::from_bundle(
                bundle.clone(),
                EventType::New,
                KnowledgeSource::Local,
            ))
            .await?;

        let mut report = BootstrapReport {
            announced: outcome.is_stored(),
            ..Default::default()
        };

        let Some(url) = self.first_contact.as_deref() else {
            info!("No first contact configured, running standalone");
            return Ok(report);
        };

        if let Err(e) = self
            .broadcast_with_retry(url, Event::from_bundle(EventType::New, bundle))
            .await
        {
            warn!(url, error = %e, "Failed to announce personality to first contact");
        } else {
            info!(url, "Announced personality to first contact");
        }

        let Some(coordinator) = self.discover_coordinator(url).await? else {
            warn!(url, "No coordinator identity discovered, continuing without edge");
            return Ok(report);
        };
        report.coordinator = Some(coordinator.clone());

        let edge_rid = EdgeRid::between(&self.state.identity, &coordinator);
        let edge = EdgeProfile {
            source: self.state.identity.clone(),
            target: coordinator.clone(),
            edge_type: EdgeType::Poll,
            rid_types: vec![RidType::AgentPersonality],
        };
        let edge_bundle = Bundle::generate(edge_rid.clone(), serde_json::to_value(&edge)?)?;

        self.processor
            .submit_and_wait(KnowledgeObject::from_bundle(
                edge_bundle.clone(),
                EventType::New,
                KnowledgeSource::Local,
            ))
            .await?;

        match self
            .broadcast_with_retry(url, Event::from_bundle(EventType::New, edge_bundle))
            .await
        {
            Ok(()) => {
                info!(coordinator = %coordinator, edge = %edge_rid, "Subscription edge established");
                report.edge = Some(edge_rid);
            }
            Err(e) => warn!(url, error = %e, "Failed to send subscription edge"),
        }

        Ok(report)
    }

    /// Poll first contact and process what comes back. The first node
    /// identity other than our own is taken to be the coordinator.
    async fn discover_coordinator(&self, url: &str) -> Result<Option<NodeRid>> {
        let transport = self.state.network.transport().as_ref();
        let own = &self.state.identity;

        let events = match self
            .retry
            .run("poll first contact", move || transport.poll_events(url, own))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(url, error = %e, "Failed to poll first contact");
                return Ok(None);
            }
        };
        debug!(url, count = events.len(), "Polled events from first contact");

        let mut coordinator = None;
        for event in events {
            if coordinator.is_none() {
                if let Rid::Node(rid) = &event.rid {
                    if rid != own {
                        coordinator = Some(rid.clone());
                    }
                }
            }
            self.processor
                .submit_and_wait(KnowledgeObject::from_event(event, KnowledgeSource::External))
                .await?;
        }
        Ok(coordinator)
    }

    async fn broadcast_with_retry(&self, url: &str, event: Event) -> Result<()> {
        let transport = self.state.network.transport().as_ref();
        self.retry
            .run("broadcast to first contact", move || {
                transport.broadcast_events(url, vec![event.clone()])
            })
            .await
    }

    fn personality_bundle(&self) -> Result<Bundle> {
        let profile = self.profile.read();
        Bundle::generate(profile.rid().clone(), profile.to_contents()?)
    }

    // ─────────────────────────────────────────────────────────────
    // Trait Updates
    // ─────────────────────────────────────────────────────────────

    /// Change a trait's value and re-publish the personality as an update.
    pub async fn update_trait(
        &self,
        name: &str,
        value: impl Into<TraitValue>,
    ) -> Result<ProcessOutcome> {
        let bundle = {
            let mut profile = self.profile.write();
            if !profile.update_trait(name, value) {
                return Err(Error::ToolNotFound {
                    name: name.to_string(),
                });
            }
            Bundle::generate(profile.rid().clone(), profile.to_contents()?)?
        };

        info!(rid = %bundle.rid(), trait_name = name, "Trait updated, re-publishing");
        self.processor
            .submit_and_wait(KnowledgeObject::from_bundle(
                bundle,
                EventType::Update,
                KnowledgeSource::Local,
            ))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
