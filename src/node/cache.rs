//! Knowledge cache
//!
//! Stores the latest bundle for every RID a node knows about. The processor
//! is the only writer; HTTP handlers read concurrently.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::{Bundle, Rid, RidType};

/// Read/write access to cached bundles.
pub trait Cache: Send + Sync {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>>;

    fn write(&self, bundle: &Bundle) -> Result<()>;

    fn exists(&self, rid: &Rid) -> Result<bool> {
        Ok(self.read(rid)?.is_some())
    }

    /// Cached RIDs, optionally restricted to one type, in canonical order.
    fn list_rids(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>>;

    /// Cached RIDs in the order they were first written. Overwriting a
    /// bundle keeps its original position.
    fn list_rids_by_first_write(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>>;
}

// ─────────────────────────────────────────────────────────────────
// Memory Cache
// ─────────────────────────────────────────────────────────────────

/// Volatile cache used by tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<MemoryEntries>,
}

#[derive(Default)]
struct MemoryEntries {
    bundles: HashMap<Rid, Bundle>,
    /// First-write order.
    order: Vec<Rid>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>> {
        Ok(self.entries.read().bundles.get(rid).cloned())
    }

    fn write(&self, bundle: &Bundle) -> Result<()> {
        let mut entries = self.entries.write();
        let rid = bundle.rid().clone();
        if entries.bundles.insert(rid.clone(), bundle.clone()).is_none() {
            entries.order.push(rid);
        }
        Ok(())
    }

    fn exists(&self, rid: &Rid) -> Result<bool> {
        Ok(self.entries.read().bundles.contains_key(rid))
    }

    fn list_rids(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>> {
        let mut rids = self.list_rids_by_first_write(rid_type)?;
        rids.sort();
        Ok(rids)
    }

    fn list_rids_by_first_write(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>> {
        Ok(self
            .entries
            .read()
            .order
            .iter()
            .filter(|rid| rid_type.map_or(true, |t| rid.rid_type() == t))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────
// File Cache
// ─────────────────────────────────────────────────────────────────

/// File listing canonical RIDs, one per line, in first-write order.
const FIRST_WRITE_INDEX: &str = "index.log";

/// One JSON file per RID, named by the SHA-256 of the canonical RID.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::IoWrite {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, rid: &Rid) -> PathBuf {
        let digest = Sha256::digest(rid.to_string().as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(FIRST_WRITE_INDEX)
    }

    fn append_to_index(&self, rid: &Rid) -> Result<()> {
        let path = self.index_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::IoWrite {
                path: path.clone(),
                source: e,
            })?;
        writeln!(file, "{}", rid).map_err(|e| Error::IoWrite { path, source: e })
    }

    fn load(path: &Path) -> Result<Bundle> {
        let raw = fs::read(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl Cache for FileCache {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>> {
        let path = self.path_for(rid);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    fn write(&self, bundle: &Bundle) -> Result<()> {
        let path = self.path_for(bundle.rid());
        let is_new = !path.exists();
        let raw = serde_json::to_vec_pretty(bundle)?;
        fs::write(&path, raw).map_err(|e| Error::IoWrite { path, source: e })?;

        if is_new {
            self.append_to_index(bundle.rid())?;
        }
        Ok(())
    }

    fn exists(&self, rid: &Rid) -> Result<bool> {
        Ok(self.path_for(rid).exists())
    }

    fn list_rids(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::IoRead {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut rids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load(&path) {
                Ok(bundle) => {
                    let rid = bundle.manifest.rid;
                    if rid_type.map_or(true, |t| rid.rid_type() == t) {
                        rids.push(rid);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                }
            }
        }
        rids.sort();
        Ok(rids)
    }

    /// Bundles missing from the index (e.g. written by an older build) are
    /// listed last, in canonical order.
    fn list_rids_by_first_write(&self, rid_type: Option<RidType>) -> Result<Vec<Rid>> {
        let index = self.index_path();
        let raw = if index.exists() {
            fs::read_to_string(&index).map_err(|e| Error::IoRead {
                path: index.clone(),
                source: e,
            })?
        } else {
            String::new()
        };

        let mut seen = HashSet::new();
        let mut rids = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let rid: Rid = match line.trim().parse() {
                Ok(rid) => rid,
                Err(e) => {
                    tracing::warn!(line, error = %e, "Skipping malformed cache index entry");
                    continue;
                }
            };
            if !seen.insert(rid.clone()) || !self.path_for(&rid).exists() {
                continue;
            }
            if rid_type.map_or(true, |t| rid.rid_type() == t) {
                rids.push(rid);
            }
        }

        for rid in self.list_rids(rid_type)? {
            if !seen.contains(&rid) {
                rids.push(rid);
            }
        }
        Ok(rids)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AgentPersonality, NodeRid};
    use serde_json::json;
    use tempfile::TempDir;

    fn exercise(cache: &dyn Cache) {
        let personality = Rid::from(AgentPersonality::new("weather", "1.0"));
        assert!(!cache.exists(&personality).unwrap());
        assert!(cache.read(&personality).unwrap().is_none());

        let bundle = Bundle::generate(personality.clone(), json!({"mood": "sunny"})).unwrap();
        cache.write(&bundle).unwrap();
        assert!(cache.exists(&personality).unwrap());
        assert_eq!(cache.read(&personality).unwrap().unwrap(), bundle);

        let node = Rid::from(NodeRid::generate("coordinator"));
        cache
            .write(&Bundle::generate(node.clone(), json!({"node_type": "FULL"})).unwrap())
            .unwrap();

        assert_eq!(cache.list_rids(None).unwrap().len(), 2);
        assert_eq!(
            cache.list_rids(Some(RidType::AgentPersonality)).unwrap(),
            vec![personality.clone()]
        );
        assert_eq!(cache.list_rids(Some(RidType::Node)).unwrap(), vec![node]);

        let newer = Bundle::generate(personality.clone(), json!({"mood": "rainy"})).unwrap();
        cache.write(&newer).unwrap();
        assert_eq!(cache.read(&personality).unwrap().unwrap().contents, json!({"mood": "rainy"}));
        assert_eq!(cache.list_rids(None).unwrap().len(), 2);
    }

    fn exercise_first_write_order(cache: &dyn Cache) {
        let zeta = Rid::from(AgentPersonality::new("zeta", "1.0"));
        let alpha = Rid::from(AgentPersonality::new("alpha", "1.0"));
        cache.write(&Bundle::generate(zeta.clone(), json!({"n": 1})).unwrap()).unwrap();
        cache.write(&Bundle::generate(alpha.clone(), json!({"n": 2})).unwrap()).unwrap();
        // Rewrite keeps the original slot
        cache.write(&Bundle::generate(zeta.clone(), json!({"n": 3})).unwrap()).unwrap();

        assert_eq!(
            cache.list_rids_by_first_write(Some(RidType::AgentPersonality)).unwrap(),
            vec![zeta.clone(), alpha.clone()]
        );
        assert_eq!(cache.list_rids(None).unwrap(), vec![alpha, zeta]);
    }

    #[test]
    fn test_memory_cache() {
        exercise(&MemoryCache::new());
    }

    #[test]
    fn test_memory_cache_first_write_order() {
        exercise_first_write_order(&MemoryCache::new());
    }

    #[test]
    fn test_file_cache_first_write_order() {
        let dir = TempDir::new().unwrap();
        exercise_first_write_order(&FileCache::open(dir.path()).unwrap());

        // Order survives reopening
        let reopened = FileCache::open(dir.path()).unwrap();
        let names: Vec<String> = reopened
            .list_rids_by_first_write(None)
            .unwrap()
            .iter()
            .filter_map(|r| r.as_personality().map(|p| p.name.clone()))
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_file_cache_lists_unindexed_bundles_last() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let indexed = Rid::from(AgentPersonality::new("indexed", "1.0"));
        cache.write(&Bundle::generate(indexed.clone(), json!({})).unwrap()).unwrap();

        let stray = Bundle::generate(AgentPersonality::new("stray", "1.0"), json!({})).unwrap();
        fs::write(cache.path_for(stray.rid()), serde_json::to_vec(&stray).unwrap()).unwrap();

        assert_eq!(
            cache.list_rids_by_first_write(None).unwrap(),
            vec![indexed, stray.rid().clone()]
        );
    }

    #[test]
    fn test_file_cache() {
        let dir = TempDir::new().unwrap();
        exercise(&FileCache::open(dir.path().join("cache")).unwrap());
    }

    #[test]
    fn test_file_cache_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let rid = Rid::from(AgentPersonality::new("weather", "1.0"));
        {
            let cache = FileCache::open(dir.path()).unwrap();
            cache
                .write(&Bundle::generate(rid.clone(), json!({"mood": "sunny"})).unwrap())
                .unwrap();
        }

        let reopened = FileCache::open(dir.path()).unwrap();
        assert!(reopened.exists(&rid).unwrap());
    }
}
