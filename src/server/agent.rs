//! Agent tool server
//!
//! Serves one agent's own profile as a resource and its callable traits as
//! tools. Routes are mounted at the root and again under `/mcp`, the tool
//! base advertised in the agent's profile.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use tower_http::trace::TraceLayer;

use crate::error::{ApiResult, Error, Result};
use crate::personality::{PersonalityProfile, TOOL_PATH_SUFFIX};
use crate::registry::{Resource, Tool, AGENT_PROFILE_TYPE, AGENT_RESOURCE_PREFIX};
use crate::server::{ResourceContent, ResourceList, ToolList, ToolResult};

#[derive(Clone)]
pub struct AgentServerState {
    pub profile: Arc<RwLock<PersonalityProfile>>,
}

impl AgentServerState {
    pub fn new(profile: Arc<RwLock<PersonalityProfile>>) -> Self {
        Self { profile }
    }
}

pub fn create_router(state: AgentServerState) -> Router {
    let routes = Router::new()
        .route("/resources/list", get(list_resources))
        .route("/resources/read/:id", get(read_resource))
        .route("/tools/list", get(list_tools))
        .route("/tools/call/:name", post(invoke_tool));

    Router::new()
        .merge(routes.clone())
        .nest(TOOL_PATH_SUFFIX, routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve a tool call against a profile's traits.
///
/// Calling a trait reads its current value.
pub fn call_tool(profile: &PersonalityProfile, name: &str) -> Result<String> {
    let t = profile.get_trait(name).ok_or_else(|| Error::ToolNotFound {
        name: name.to_string(),
    })?;
    if !t.is_callable {
        return Err(Error::ToolNotCallable {
            name: name.to_string(),
        });
    }
    Ok(format!("Value of {}: {}", t.name, t.value))
}

// ─────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────

async fn list_resources(State(state): State<AgentServerState>) -> Json<ResourceList> {
    let profile = state.profile.read();
    let id = format!("{}{}", AGENT_RESOURCE_PREFIX, profile.name());
    Json(ResourceList {
        resources: vec![Resource {
            url: format!("/resources/read/{}", id),
            id,
            resource_type: AGENT_PROFILE_TYPE.to_string(),
            description: format!("{} agent personality", profile.name()),
        }],
    })
}

async fn read_resource(
    State(state): State<AgentServerState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResourceContent>> {
    let profile = state.profile.read();
    let own_id = format!("{}{}", AGENT_RESOURCE_PREFIX, profile.name());
    if id != own_id {
        return Err(Error::ResourceNotFound { id }.into());
    }

    Ok(Json(ResourceContent {
        id,
        resource_type: AGENT_PROFILE_TYPE.to_string(),
        content: profile.to_contents()?,
    }))
}

async fn list_tools(State(state): State<AgentServerState>) -> Json<ToolList> {
    let profile = state.profile.read();
    Json(ToolList {
        tools: profile
            .callable_traits()
            .map(|t| Tool::from_trait(t, ""))
            .collect(),
    })
}

/// The request body is accepted and ignored.
async fn invoke_tool(
    State(state): State<AgentServerState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ToolResult>> {
    let result = call_tool(&state.profile.read(), &name)?;
    Ok(Json(ToolResult { result }))
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
