//! Access control and the plain-record source used for seeding.
//!
//! The sync endpoints never own list membership or the plain records; both
//! come from the surrounding application through [`AccessGate`] and
//! [`RecordSource`]. [`MemoryCatalog`] implements both for tests, the demo
//! and the `serve` command.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tasksync_core::{NewRecord, RecordId};

use crate::error::CatalogError;

/// Decides whether a principal may read and write a collection.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn authorize(&self, principal: &str, collection_id: &str) -> Result<(), CatalogError>;
}

/// Supplies the plain records a collection held before collaborative
/// editing started. Read exactly once per document, at seeding time.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn records_for(&self, collection_id: &str) -> Result<Vec<NewRecord>, CatalogError>;
}

/// A plain record as stored by the surrounding application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<u64>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

impl PlainRecord {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            completed: false,
            due_date: None,
            order: None,
            created_at: None,
        }
    }
}

impl From<PlainRecord> for NewRecord {
    fn from(plain: PlainRecord) -> Self {
        NewRecord {
            id: plain.id.map(RecordId::from_string),
            content: plain.content,
            completed: plain.completed,
            due_date: plain.due_date,
            order: plain.order,
            created_at: plain.created_at,
        }
    }
}

/// A collection with its owner, collaborators and plain records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub records: Vec<PlainRecord>,
}

impl CollectionEntry {
    fn can_access(&self, principal: &str) -> bool {
        self.owner == principal || self.members.iter().any(|m| m == principal)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CatalogFile {
    collections: Vec<CollectionEntry>,
}

/// In-memory catalog of collections.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    collections: RwLock<HashMap<String, CollectionEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from JSON of the form `{"collections": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let catalog = Self::new();
        for entry in file.collections {
            catalog.insert(entry);
        }
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn insert(&self, entry: CollectionEntry) {
        self.collections.write().insert(entry.id.clone(), entry);
    }

    /// Register a collection owned by `owner` with the given records.
    pub fn add_collection(
        &self,
        id: impl Into<String>,
        owner: impl Into<String>,
        records: Vec<PlainRecord>,
    ) {
        self.insert(CollectionEntry {
            id: id.into(),
            owner: owner.into(),
            members: Vec::new(),
            records,
        });
    }

    /// Grant `principal` access to an existing collection.
    pub fn share(&self, collection_id: &str, principal: impl Into<String>) -> bool {
        match self.collections.write().get_mut(collection_id) {
            Some(entry) => {
                entry.members.push(principal.into());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }
}

#[async_trait]
impl AccessGate for MemoryCatalog {
    async fn authorize(&self, principal: &str, collection_id: &str) -> Result<(), CatalogError> {
        let collections = self.collections.read();
        let entry = collections
            .get(collection_id)
            .ok_or_else(|| CatalogError::NotFound(collection_id.to_string()))?;
        if entry.can_access(principal) {
            Ok(())
        } else {
            Err(CatalogError::AccessDenied)
        }
    }
}

#[async_trait]
impl RecordSource for MemoryCatalog {
    async fn records_for(&self, collection_id: &str) -> Result<Vec<NewRecord>, CatalogError> {
        let collections = self.collections.read();
        let entry = collections
            .get(collection_id)
            .ok_or_else(|| CatalogError::NotFound(collection_id.to_string()))?;
        Ok(entry.records.iter().cloned().map(NewRecord::from).collect())
    }
}
