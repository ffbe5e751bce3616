//! Record types exposed by the task document.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Globally unique, client-generated record identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A point-in-time view of one live record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub content: String,
    pub completed: bool,
    /// Unix milliseconds.
    pub due_date: Option<u64>,
    pub order: i64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Initial contents of a record about to be inserted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewRecord {
    /// Explicit id, e.g. when seeding from an existing plain record.
    pub id: Option<RecordId>,
    pub content: String,
    pub completed: bool,
    pub due_date: Option<u64>,
    /// Explicit sort key; derived from the insert position when absent.
    pub order: Option<i64>,
    /// Explicit creation time; the wall clock when absent.
    pub created_at: Option<u64>,
}

impl NewRecord {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn due_date(mut self, due_date: Option<u64>) -> Self {
        self.due_date = due_date;
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// One field write. The set is closed: these are the only fields a record
/// carries, and each merges independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPatch {
    Content(String),
    Completed(bool),
    DueDate(Option<u64>),
    Order(i64),
    /// Maintained by the document on every local write.
    UpdatedAt(u64),
}

/// A set of field writes applied to one record in a single call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordPatch {
    fields: Vec<FieldPatch>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.fields.push(FieldPatch::Content(content.into()));
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.fields.push(FieldPatch::Completed(completed));
        self
    }

    pub fn due_date(mut self, due_date: Option<u64>) -> Self {
        self.fields.push(FieldPatch::DueDate(due_date));
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.fields.push(FieldPatch::Order(order));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// User-settable fields in call order. `UpdatedAt` is never included.
    pub fn fields(&self) -> impl Iterator<Item = &FieldPatch> {
        self.fields
            .iter()
            .filter(|f| !matches!(f, FieldPatch::UpdatedAt(_)))
    }
}

/// Value stored under a metadata key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    Text(String),
    Timestamp(u64),
}

impl Default for MetaValue {
    fn default() -> Self {
        MetaValue::Text(String::new())
    }
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            MetaValue::Timestamp(_) => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<u64> {
        match self {
            MetaValue::Timestamp(t) => Some(*t),
            MetaValue::Text(_) => None,
        }
    }
}

/// Metadata key holding the parent collection id.
pub const META_PARENT_ID: &str = "parentId";
/// Metadata key holding the time of the last local mutation.
pub const META_LAST_MODIFIED: &str = "lastModified";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_are_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn test_patch_builder_keeps_call_order() {
        let patch = RecordPatch::new().content("Call Bob").completed(true);
        let fields: Vec<_> = patch.fields().cloned().collect();
        assert_eq!(
            fields,
            vec![
                FieldPatch::Content("Call Bob".to_string()),
                FieldPatch::Completed(true)
            ]
        );
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let record = Record {
            id: RecordId::from("t1"),
            content: "Buy milk".to_string(),
            completed: false,
            due_date: None,
            order: 0,
            created_at: 1,
            updated_at: 2,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"dueDate\":null"));
        assert!(json.contains("\"updatedAt\":2"));
    }
}
