//! Coordinator registry server
//!
//! Resource and tool listings over every registered agent, plus the
//! knowledge-network endpoints nested under `/koi-net`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::{ApiResult, Error};
use crate::node::CoordinatorNode;
use crate::protocol::{
    BundlesPayload, EventsPayload, FetchBundles, FetchManifests, FetchRids, ManifestsPayload,
    PollEvents, RidsPayload, BROADCAST_EVENTS_PATH, FETCH_BUNDLES_PATH, FETCH_MANIFESTS_PATH,
    FETCH_RIDS_PATH, KOI_NET_PREFIX, POLL_EVENTS_PATH,
};
use crate::registry::{AGENT_PROFILE_TYPE, AGENT_RESOURCE_PREFIX};
use crate::server::{ResourceContent, ResourceList, ToolList};

#[derive(Clone)]
pub struct RegistryServerState {
    pub node: Arc<CoordinatorNode>,
}

impl RegistryServerState {
    pub fn new(node: Arc<CoordinatorNode>) -> Self {
        Self { node }
    }
}

pub fn create_router(state: RegistryServerState) -> Router {
    let koi_net = Router::new()
        .route(BROADCAST_EVENTS_PATH, post(broadcast_events))
        .route(POLL_EVENTS_PATH, post(poll_events))
        .route(FETCH_RIDS_PATH, post(fetch_rids))
        .route(FETCH_MANIFESTS_PATH, post(fetch_manifests))
        .route(FETCH_BUNDLES_PATH, post(fetch_bundles));

    Router::new()
        // Registry
        .route("/resources/list", get(list_resources))
        .route("/resources/read/:id", get(read_resource))
        .route("/tools/list", get(list_tools))
        // Knowledge network
        .nest(KOI_NET_PREFIX, koi_net)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────
// Registry Handlers
// ─────────────────────────────────────────────────────────────────

async fn list_resources(State(state): State<RegistryServerState>) -> Json<ResourceList> {
    Json(ResourceList {
        resources: state.node.adapter().list_resources(),
    })
}

async fn read_resource(
    State(state): State<RegistryServerState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResourceContent>> {
    let profile = id
        .strip_prefix(AGENT_RESOURCE_PREFIX)
        .and_then(|name| state.node.adapter().get(name))
        .ok_or_else(|| Error::ResourceNotFound { id: id.clone() })?;

    Ok(Json(ResourceContent {
        id,
        resource_type: AGENT_PROFILE_TYPE.to_string(),
        content: profile.to_contents()?,
    }))
}

async fn list_tools(State(state): State<RegistryServerState>) -> Json<ToolList> {
    Json(ToolList {
        tools: state.node.adapter().get_all_tools(),
    })
}

// ─────────────────────────────────────────────────────────────────
// Knowledge-Network Handlers
// ─────────────────────────────────────────────────────────────────

async fn broadcast_events(
    State(state): State<RegistryServerState>,
    Json(payload): Json<EventsPayload>,
) -> ApiResult<Json<Value>> {
    state.node.handle_broadcast(payload.events).await?;
    Ok(Json(json!({})))
}

async fn poll_events(
    State(state): State<RegistryServerState>,
    Json(req): Json<PollEvents>,
) -> ApiResult<Json<EventsPayload>> {
    Ok(Json(state.node.poll(&req)?))
}

async fn fetch_rids(
    State(state): State<RegistryServerState>,
    Json(req): Json<FetchRids>,
) -> ApiResult<Json<RidsPayload>> {
    Ok(Json(state.node.fetch_rids(&req)?))
}

async fn fetch_manifests(
    State(state): State<RegistryServerState>,
    Json(req): Json<FetchManifests>,
) -> ApiResult<Json<ManifestsPayload>> {
    Ok(Json(state.node.fetch_manifests(&req)?))
}

async fn fetch_bundles(
    State(state): State<RegistryServerState>,
    Json(req): Json<FetchBundles>,
) -> ApiResult<Json<BundlesPayload>> {
    Ok(Json(state.node.fetch_bundles(&req)?))
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
