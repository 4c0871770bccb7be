//! Persistent node identity
//!
//! A node generates its network identity once and reuses it on later runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::protocol::NodeRid;

const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    rid: NodeRid,
}

/// Load the identity stored in `node_dir`, or generate and store a new one.
///
/// A stored identity for a different node name is replaced.
pub fn load_or_generate(node_dir: &Path, name: &str) -> Result<NodeRid> {
    let path = identity_path(node_dir);

    if path.exists() {
        let raw = fs::read(&path).map_err(|e| Error::IoRead {
            path: path.clone(),
            source: e,
        })?;
        let stored: IdentityFile = serde_json::from_slice(&raw)?;
        if stored.rid.name == name {
            info!(rid = %stored.rid, "Loaded node identity");
            return Ok(stored.rid);
        }
    }

    let rid = NodeRid::generate(name);
    fs::create_dir_all(node_dir).map_err(|e| Error::IoWrite {
        path: node_dir.to_path_buf(),
        source: e,
    })?;
    let raw = serde_json::to_vec_pretty(&IdentityFile { rid: rid.clone() })?;
    fs::write(&path, raw).map_err(|e| Error::IoWrite { path, source: e })?;

    info!(rid = %rid, "Generated node identity");
    Ok(rid)
}

fn identity_path(node_dir: &Path) -> PathBuf {
    node_dir.join(IDENTITY_FILE)
}
