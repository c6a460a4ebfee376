//! Version identifiers and the authority that issues them.
//!
//! Every stored version of a resource is its own document, keyed by its
//! version id. The authority decides which version of a resource is current.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::protocol(format!("Invalid version id {:?}: {}", s, e)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Identity shared by every version of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::protocol(format!("Invalid resource id {:?}: {}", s, e)))
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub resource: ResourceId,
    /// 1 for the first version of a resource
    pub number: u32,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait VersionAuthority: Send + Sync {
    /// Issue a new version. `None` starts a new resource.
    async fn create_new_version(&self, resource: Option<ResourceId>) -> Result<Version>;

    /// The current version of each resource the given versions belong to.
    /// Unknown ids are skipped; each resource appears once, in first-seen
    /// order.
    async fn get_current_versions(&self, ids: &[VersionId]) -> Result<Vec<Version>>;
}

#[derive(Debug, Default)]
struct Registry {
    history: HashMap<ResourceId, Vec<Version>>,
    owners: HashMap<VersionId, ResourceId>,
}

/// Process-local authority, for tests and offline hosts.
#[derive(Debug, Default)]
pub struct InMemoryVersionAuthority {
    registry: Mutex<Registry>,
}

impl InMemoryVersionAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total versions issued.
    pub fn versions_issued(&self) -> usize {
        let registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        registry.owners.len()
    }
}

#[async_trait]
impl VersionAuthority for InMemoryVersionAuthority {
    async fn create_new_version(&self, resource: Option<ResourceId>) -> Result<Version> {
        let mut registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        let resource = match resource {
            Some(resource) if !registry.history.contains_key(&resource) => {
                return Err(Error::VersionAuthority(format!(
                    "Unknown resource {}",
                    resource
                )));
            }
            Some(resource) => resource,
            None => ResourceId::new(),
        };

        let history = registry.history.entry(resource).or_default();
        let version = Version {
            id: VersionId::new(),
            resource,
            number: history.len() as u32 + 1,
            created: Utc::now(),
        };
        history.push(version.clone());
        registry.owners.insert(version.id, resource);
        Ok(version)
    }

    async fn get_current_versions(&self, ids: &[VersionId]) -> Result<Vec<Version>> {
        let registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        let mut seen = HashSet::new();
        let mut current = Vec::new();
        for id in ids {
            let Some(resource) = registry.owners.get(id) else {
                continue;
            };
            if !seen.insert(*resource) {
                continue;
            }
            if let Some(latest) = registry.history.get(resource).and_then(|h| h.last()) {
                current.push(latest.clone());
            }
        }
        Ok(current)
    }
}
