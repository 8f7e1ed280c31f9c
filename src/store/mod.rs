//! Snapshot Store: save/load/list over a flat key-value backend.
//!
//! Three kinds of slot live under one key prefix:
//! - `<prefix>`: the single quick-save slot, `{html, css, js, timestamp}`
//! - `<prefix>.projects`: named projects, `[{name, html, css, js, timestamp}, ..]`
//! - `<prefix>.autosave`: auto-save slot, same shape as the single slot
//!
//! Auto-save only ever touches its own slot.

pub mod backend;

pub use backend::{FileBackend, KvBackend, MemoryBackend};

use crate::{Error, Result, SourceBundle};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stored copy of the editor sources
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub bundle: SourceBundle,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the project list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SlotRecord {
    #[serde(flatten)]
    bundle: SourceBundle,
    #[serde(default)]
    timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct NamedRecord {
    name: String,
    #[serde(flatten)]
    bundle: SourceBundle,
    #[serde(default)]
    timestamp: DateTime<Utc>,
}

/// SHA-256 over the bundle's canonical JSON, hex encoded
pub fn fingerprint(bundle: &SourceBundle) -> String {
    let json = serde_json::to_vec(bundle).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

/// Snapshot persistence over any `KvBackend`
pub struct SnapshotStore<B: KvBackend> {
    backend: B,
    key: String,
    last_auto: Option<String>,
}

impl<B: KvBackend> SnapshotStore<B> {
    pub fn new(backend: B, key: impl Into<String>) -> Self {
        Self { backend, key: key.into(), last_auto: None }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn projects_key(&self) -> String {
        format!("{}.projects", self.key)
    }

    fn auto_key(&self) -> String {
        format!("{}.autosave", self.key)
    }

    fn read_slot(&self, key: &str) -> Result<Option<Snapshot>> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        let rec: SlotRecord =
            serde_json::from_str(&raw).map_err(|e| Error::Storage(format!("corrupt snapshot {}: {}", key, e)))?;
        Ok(Some(Snapshot { bundle: rec.bundle, name: None, created_at: rec.timestamp }))
    }

    fn write_slot(&mut self, key: &str, bundle: &SourceBundle, at: DateTime<Utc>) -> Result<()> {
        let rec = SlotRecord { bundle: bundle.clone(), timestamp: at };
        let raw = serde_json::to_string(&rec)?;
        self.backend.set(key, &raw)
    }

    fn read_projects(&self) -> Result<Vec<NamedRecord>> {
        let key = self.projects_key();
        match self.backend.get(&key)? {
            None => Ok(Vec::new()),
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| Error::Storage(format!("corrupt project list {}: {}", key, e)))
            }
        }
    }

    fn write_projects(&mut self, projects: &[NamedRecord]) -> Result<()> {
        let raw = serde_json::to_string(projects)?;
        let key = self.projects_key();
        self.backend.set(&key, &raw)
    }

    /// Save to the single slot, or under `name` in the project list.
    ///
    /// An existing name is overwritten in place; a new one is appended.
    pub fn save(&mut self, bundle: &SourceBundle, name: Option<&str>) -> Result<Snapshot> {
        let now = Utc::now();
        match name {
            None => {
                let key = self.key.clone();
                self.write_slot(&key, bundle, now)?;
                debug!("saved single slot {}", key);
                Ok(Snapshot { bundle: bundle.clone(), name: None, created_at: now })
            }
            Some(name) => {
                let name = validate_name(name)?;
                let mut projects = self.read_projects()?;
                let rec = NamedRecord { name: name.to_string(), bundle: bundle.clone(), timestamp: now };
                match projects.iter_mut().find(|p| p.name == name) {
                    Some(slot) => *slot = rec,
                    None => projects.push(rec),
                }
                self.write_projects(&projects)?;
                info!("saved project {:?} ({} total)", name, projects.len());
                Ok(Snapshot { bundle: bundle.clone(), name: Some(name.to_string()), created_at: now })
            }
        }
    }

    /// Load the single slot (no name) or a named project.
    pub fn load(&self, name: Option<&str>) -> Result<Option<SourceBundle>> {
        Ok(self.load_snapshot(name)?.map(|s| s.bundle))
    }

    pub fn load_snapshot(&self, name: Option<&str>) -> Result<Option<Snapshot>> {
        match name {
            None => self.read_slot(&self.key),
            Some(name) => {
                let name = name.trim();
                Ok(self.read_projects()?.into_iter().find(|p| p.name == name).map(|p| Snapshot {
                    bundle: p.bundle,
                    name: Some(p.name),
                    created_at: p.timestamp,
                }))
            }
        }
    }

    /// Named projects in stored order
    pub fn list(&self) -> Result<Vec<ProjectEntry>> {
        Ok(self
            .read_projects()?
            .into_iter()
            .map(|p| ProjectEntry { name: p.name, created_at: p.timestamp })
            .collect())
    }

    /// Remove the single slot or one named project; `Ok(false)` if absent.
    pub fn clear(&mut self, name: Option<&str>) -> Result<bool> {
        match name {
            None => {
                let key = self.key.clone();
                let existed = self.backend.get(&key)?.is_some();
                self.backend.remove(&key)?;
                Ok(existed)
            }
            Some(name) => {
                let name = name.trim();
                let mut projects = self.read_projects()?;
                let before = projects.len();
                projects.retain(|p| p.name != name);
                if projects.len() == before {
                    return Ok(false);
                }
                self.write_projects(&projects)?;
                Ok(true)
            }
        }
    }

    /// Write the auto-save slot unless the bundle is unchanged since the last
    /// auto-save. Returns whether a write happened.
    pub fn auto_save(&mut self, bundle: &SourceBundle) -> Result<bool> {
        let digest = fingerprint(bundle);
        if self.last_auto.as_deref() == Some(digest.as_str()) {
            debug!("auto-save skipped, content unchanged");
            return Ok(false);
        }
        let key = self.auto_key();
        self.write_slot(&key, bundle, Utc::now())?;
        self.last_auto = Some(digest);
        Ok(true)
    }

    pub fn load_auto(&self) -> Result<Option<Snapshot>> {
        self.read_slot(&self.auto_key())
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Storage("project name must not be empty".into()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SnapshotStore<MemoryBackend> {
        SnapshotStore::new(MemoryBackend::new(), "codePortfolio")
    }

    fn b(js: &str) -> SourceBundle {
        SourceBundle::new("<p>", "p{}", js)
    }

    #[test]
    fn single_slot_overwrites() {
        let mut s = store();
        assert_eq!(s.load(None).unwrap(), None);
        s.save(&b("1"), None).unwrap();
        s.save(&b("2"), None).unwrap();
        assert_eq!(s.load(None).unwrap(), Some(b("2")));
        assert!(s.list().unwrap().is_empty());
    }

    #[test]
    fn single_slot_layout() {
        let mut s = store();
        s.save(&b("x"), None).unwrap();
        let raw = s.backend().get("codePortfolio").unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["html"], "<p>");
        assert_eq!(v["css"], "p{}");
        assert_eq!(v["js"], "x");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn existing_name_overwrites_in_place() {
        let mut s = store();
        s.save(&b("a"), Some("alpha")).unwrap();
        s.save(&b("b"), Some("beta")).unwrap();
        s.save(&b("c"), Some("gamma")).unwrap();
        s.save(&b("b2"), Some("beta")).unwrap();

        let names: Vec<String> = s.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(s.load(Some("beta")).unwrap(), Some(b("b2")));
        assert_eq!(s.load(Some("alpha")).unwrap(), Some(b("a")));
    }

    #[test]
    fn empty_name_rejected() {
        let mut s = store();
        assert!(s.save(&b("a"), Some("   ")).unwrap_err().is_storage());
    }

    #[test]
    fn auto_save_stays_out_of_named_list() {
        let mut s = store();
        s.save(&b("named"), Some("mine")).unwrap();
        assert!(s.auto_save(&b("auto")).unwrap());
        let list = s.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "mine");
        assert_eq!(s.load(Some("mine")).unwrap(), Some(b("named")));
        assert_eq!(s.load(None).unwrap(), None);
        assert_eq!(s.load_auto().unwrap().map(|s| s.bundle), Some(b("auto")));
    }

    #[test]
    fn auto_save_skips_unchanged_content() {
        let mut s = store();
        assert!(s.auto_save(&b("1")).unwrap());
        assert!(!s.auto_save(&b("1")).unwrap());
        assert!(s.auto_save(&b("2")).unwrap());
    }

    #[test]
    fn clear_removes_entries() {
        let mut s = store();
        s.save(&b("1"), None).unwrap();
        s.save(&b("a"), Some("a")).unwrap();
        assert!(s.clear(None).unwrap());
        assert!(!s.clear(None).unwrap());
        assert!(s.clear(Some("a")).unwrap());
        assert!(!s.clear(Some("a")).unwrap());
        assert!(s.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_slot_is_storage_error() {
        let mut s = store();
        s.backend_mut().set("codePortfolio", "{nope").unwrap();
        assert!(s.load(None).unwrap_err().is_storage());
    }

    #[test]
    fn quota_failure_is_storage_error() {
        let mut s = SnapshotStore::new(MemoryBackend::with_quota(8), "k");
        assert!(s.save(&b("1"), None).unwrap_err().is_storage());
    }

    #[test]
    fn tolerates_missing_fields() {
        let mut s = store();
        s.backend_mut().set("codePortfolio", r#"{"js":"only"}"#).unwrap();
        let snap = s.load_snapshot(None).unwrap().unwrap();
        assert_eq!(snap.bundle, SourceBundle::new("", "", "only"));
    }
}
