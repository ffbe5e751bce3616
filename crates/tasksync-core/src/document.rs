//! Task Document - the replicated ordered list of records.
//!
//! A [`TaskDocument`] holds:
//! - an arena of records keyed by [`RecordId`], each with last-writer-wins
//!   field registers and an optional tombstone
//! - a sequence structure (RGA): every record remembers the record it was
//!   inserted after, siblings are ordered newest-first
//! - a metadata map of last-writer-wins registers
//! - the state vector and highest Lamport time seen
//!
//! The visible order sorts live records by their `order` field, ties broken
//! by sequence position, so concurrent appends with the same sort key still
//! land in the same place on every replica.

use crate::clock::{now_ms, ReplicaId, Stamp, MAX_CLOCK};
use crate::codec::{DecodeError, EncodeError};
use crate::lwwreg::LwwRegister;
use crate::record::{
    FieldPatch, MetaValue, NewRecord, Record, RecordId, RecordPatch, META_LAST_MODIFIED,
    META_PARENT_ID,
};
use crate::state_vector::StateVector;
use crate::update::{DeleteOp, InsertOp, MetaOp, SetOp, Update};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One record slot in the arena, live or tombstoned.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RecordEntry {
    origin: Option<RecordId>,
    inserted: Stamp,
    created_at: u64,
    content: LwwRegister<String>,
    completed: LwwRegister<bool>,
    due_date: LwwRegister<Option<u64>>,
    order: LwwRegister<i64>,
    updated_at: LwwRegister<u64>,
    deleted: Option<Stamp>,
}

impl RecordEntry {
    fn new(op: &InsertOp) -> Self {
        Self {
            origin: op.origin.clone(),
            inserted: op.stamp.clone(),
            created_at: op.created_at,
            content: LwwRegister::default(),
            completed: LwwRegister::default(),
            due_date: LwwRegister::default(),
            order: LwwRegister::default(),
            updated_at: LwwRegister::default(),
            deleted: None,
        }
    }

    fn is_live(&self) -> bool {
        self.deleted.is_none()
    }

    fn apply(&mut self, patch: &FieldPatch, stamp: Stamp) -> bool {
        match patch {
            FieldPatch::Content(v) => self.content.set(v.clone(), stamp),
            FieldPatch::Completed(v) => self.completed.set(*v, stamp),
            FieldPatch::DueDate(v) => self.due_date.set(*v, stamp),
            FieldPatch::Order(v) => self.order.set(*v, stamp),
            FieldPatch::UpdatedAt(v) => self.updated_at.set(*v, stamp),
        }
    }

    fn tombstone(&mut self, stamp: Stamp) -> bool {
        match &self.deleted {
            Some(existing) if *existing >= stamp => false,
            _ => {
                self.deleted = Some(stamp);
                true
            }
        }
    }

    /// Current field values as patches, paired with the stamp that wrote them.
    fn field_writes(&self) -> [(FieldPatch, &Stamp); 5] {
        [
            (FieldPatch::Content(self.content.get().clone()), self.content.stamp()),
            (FieldPatch::Completed(*self.completed.get()), self.completed.stamp()),
            (FieldPatch::DueDate(*self.due_date.get()), self.due_date.stamp()),
            (FieldPatch::Order(*self.order.get()), self.order.stamp()),
            (FieldPatch::UpdatedAt(*self.updated_at.get()), self.updated_at.stamp()),
        ]
    }

    fn view(&self, id: &RecordId) -> Record {
        Record {
            id: id.clone(),
            content: self.content.get().clone(),
            completed: *self.completed.get(),
            due_date: *self.due_date.get(),
            order: *self.order.get(),
            created_at: self.created_at,
            updated_at: self.created_at.max(*self.updated_at.get()),
        }
    }
}

/// Counts of operations that changed state during [`TaskDocument::apply_update`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub inserted: usize,
    pub fields_changed: usize,
    pub deleted: usize,
    pub metadata_changed: usize,
}

impl ApplySummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.fields_changed + self.deleted + self.metadata_changed > 0
    }
}

/// The replicated task list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDocument {
    replica_id: ReplicaId,
    lamport: u64,
    vector: StateVector,
    records: HashMap<RecordId, RecordEntry>,
    /// Records inserted at the head, newest first.
    roots: Vec<RecordId>,
    /// Records inserted after a given record, newest first.
    children: HashMap<RecordId, Vec<RecordId>>,
    meta: BTreeMap<String, LwwRegister<MetaValue>>,
}

impl TaskDocument {
    /// Create an empty document owned by `replica_id`.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            lamport: 0,
            vector: StateVector::new(),
            records: HashMap::new(),
            roots: Vec::new(),
            children: HashMap::new(),
            meta: BTreeMap::new(),
        }
    }

    /// Rebuild a document from an encoded full state.
    pub fn from_state(replica_id: impl Into<ReplicaId>, state: &[u8]) -> Result<Self, DecodeError> {
        let mut doc = Self::new(replica_id);
        doc.apply_update(state)?;
        Ok(doc)
    }

    /// Build a new document for `collection_id` holding `records` in order.
    ///
    /// Each record becomes one insert (plus its field writes) on this
    /// replica; records whose id is already taken are skipped.
    pub fn seeded(
        replica_id: impl Into<ReplicaId>,
        collection_id: &str,
        records: impl IntoIterator<Item = NewRecord>,
    ) -> Self {
        let mut doc = Self::new(replica_id);
        doc.set_metadata(META_PARENT_ID, MetaValue::Text(collection_id.to_string()));
        for record in records {
            let end = doc.len();
            doc.insert_with(record, end);
        }
        doc
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn state_vector(&self) -> &StateVector {
        &self.vector
    }

    /// Highest Lamport time incorporated.
    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if this replica holds operations `since` does not cover.
    pub fn has_changes_since(&self, since: &StateVector) -> bool {
        !since.dominates(&self.vector)
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Insert a record with `content` at `position` in the visible order.
    pub fn insert_record(&mut self, content: impl Into<String>, position: usize) -> RecordId {
        let id = RecordId::new();
        self.insert_with(NewRecord::new(content).with_id(id.clone()), position);
        id
    }

    /// Append a record with `content` at the end of the visible order.
    pub fn push_record(&mut self, content: impl Into<String>) -> RecordId {
        let end = self.len();
        self.insert_record(content, end)
    }

    /// Insert a fully specified record at `position` (clamped to the end).
    ///
    /// Returns `None` if the requested id already exists in this document.
    pub fn insert_with(&mut self, record: NewRecord, position: usize) -> Option<RecordId> {
        let id = record.id.unwrap_or_default();
        if self.records.contains_key(&id) {
            return None;
        }

        let visible = self.visible_ids();
        let position = position.min(visible.len());
        let (origin, default_order) = match visible.get(position) {
            Some(anchor) => (self.predecessor(anchor), self.order_of(anchor)),
            None => (
                self.sequence().last().cloned(),
                visible.last().map_or(0, |last| self.order_of(last) + 1),
            ),
        };
        let order = record.order.unwrap_or(default_order);
        let created_at = record.created_at.unwrap_or_else(now_ms);

        let stamp = self.next_stamp();
        self.integrate_insert(&InsertOp {
            id: id.clone(),
            origin,
            stamp,
            created_at,
        });

        let mut fields = vec![FieldPatch::Content(record.content), FieldPatch::Order(order)];
        if record.completed {
            fields.push(FieldPatch::Completed(true));
        }
        if record.due_date.is_some() {
            fields.push(FieldPatch::DueDate(record.due_date));
        }
        for patch in fields {
            let stamp = self.next_stamp();
            self.apply_field(&id, &patch, stamp);
        }

        self.touch();
        Some(id)
    }

    /// Apply `patch` to a live record. Returns false if the record is absent
    /// or deleted.
    pub fn update_record(&mut self, id: &RecordId, patch: &RecordPatch) -> bool {
        if !self.records.get(id).is_some_and(RecordEntry::is_live) {
            return false;
        }
        if patch.is_empty() {
            return true;
        }

        for field in patch.fields() {
            let stamp = self.next_stamp();
            self.apply_field(id, field, stamp);
        }
        let stamp = self.next_stamp();
        self.apply_field(id, &FieldPatch::UpdatedAt(now_ms()), stamp);
        self.touch();
        true
    }

    /// Tombstone a live record. Returns false if absent or already deleted.
    pub fn delete_record(&mut self, id: &RecordId) -> bool {
        if !self.records.get(id).is_some_and(RecordEntry::is_live) {
            return false;
        }
        let stamp = self.next_stamp();
        if let Some(entry) = self.records.get_mut(id) {
            entry.tombstone(stamp);
        }
        self.touch();
        true
    }

    /// Write a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: MetaValue) {
        let stamp = self.next_stamp();
        self.meta.entry(key.into()).or_default().set(value, stamp);
    }

    fn touch(&mut self) {
        self.set_metadata(META_LAST_MODIFIED, MetaValue::Timestamp(now_ms()));
    }

    /// Merged clocks never exceed `MAX_CLOCK`, so neither increment overflows.
    fn next_stamp(&mut self) -> Stamp {
        self.lamport += 1;
        let seq = self.vector.increment(self.replica_id.clone());
        Stamp::new(self.lamport, self.replica_id.clone(), seq)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Live records in visible order.
    pub fn list_records(&self) -> Vec<Record> {
        self.visible_ids()
            .iter()
            .filter_map(|id| self.records.get(id).map(|e| e.view(id)))
            .collect()
    }

    /// A live record by id.
    pub fn get_record(&self, id: &RecordId) -> Option<Record> {
        self.records
            .get(id)
            .filter(|e| e.is_live())
            .map(|e| e.view(id))
    }

    pub fn metadata(&self) -> BTreeMap<String, MetaValue> {
        self.meta
            .iter()
            .filter(|(_, reg)| !reg.is_unset())
            .map(|(k, reg)| (k.clone(), reg.get().clone()))
            .collect()
    }

    /// Parent collection id recorded at seeding time.
    pub fn parent_collection(&self) -> Option<&str> {
        self.meta.get(META_PARENT_ID).and_then(|reg| reg.get().as_text())
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.meta
            .get(META_LAST_MODIFIED)
            .and_then(|reg| reg.get().as_timestamp())
    }

    /// All record ids in sequence order, tombstones included.
    fn sequence(&self) -> Vec<RecordId> {
        let mut out = Vec::with_capacity(self.records.len());
        let mut stack: Vec<&RecordId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id.clone());
            if let Some(children) = self.children.get(id) {
                stack.extend(children.iter().rev());
            }
        }
        out
    }

    /// Live record ids sorted by `(order, sequence position)`.
    fn visible_ids(&self) -> Vec<RecordId> {
        let mut live: Vec<(i64, usize, RecordId)> = self
            .sequence()
            .into_iter()
            .enumerate()
            .filter_map(|(pos, id)| {
                let entry = self.records.get(&id)?;
                entry.is_live().then(|| (*entry.order.get(), pos, id))
            })
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        live.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Record immediately before `id` in sequence order, tombstones included.
    fn predecessor(&self, id: &RecordId) -> Option<RecordId> {
        let sequence = self.sequence();
        let pos = sequence.iter().position(|s| s == id)?;
        pos.checked_sub(1).map(|prev| sequence[prev].clone())
    }

    fn order_of(&self, id: &RecordId) -> i64 {
        self.records.get(id).map_or(0, |e| *e.order.get())
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    /// Everything this replica holds that `since` does not cover.
    pub fn delta_since(&self, since: &StateVector) -> Update {
        let mut update = Update::new(self.vector.clone(), self.lamport);
        if !since.is_empty() {
            update.base = since.clone();
        }

        for (id, entry) in &self.records {
            if !since.covers(&entry.inserted) {
                update.inserts.push(InsertOp {
                    id: id.clone(),
                    origin: entry.origin.clone(),
                    stamp: entry.inserted.clone(),
                    created_at: entry.created_at,
                });
            }
            for (patch, stamp) in entry.field_writes() {
                if !stamp.is_zero() && !since.covers(stamp) {
                    update.sets.push(SetOp {
                        record: id.clone(),
                        stamp: stamp.clone(),
                        patch,
                    });
                }
            }
            if let Some(stamp) = entry.deleted.as_ref().filter(|s| !since.covers(s)) {
                update.deletes.push(DeleteOp {
                    record: id.clone(),
                    stamp: stamp.clone(),
                });
            }
        }

        for (key, reg) in &self.meta {
            if !reg.is_unset() && !since.covers(reg.stamp()) {
                update.meta.push(MetaOp {
                    key: key.clone(),
                    stamp: reg.stamp().clone(),
                    value: reg.get().clone(),
                });
            }
        }

        update.canonicalize();
        update
    }

    /// Encode the whole document.
    pub fn encode_full_state(&self) -> Result<Vec<u8>, EncodeError> {
        self.delta_since(&StateVector::new()).encode()
    }

    /// Encode the operations a replica at `since` is missing.
    pub fn encode_update_since(&self, since: &StateVector) -> Result<Vec<u8>, EncodeError> {
        self.delta_since(since).encode()
    }

    pub fn encode_state_vector(&self) -> Result<Vec<u8>, EncodeError> {
        self.vector.encode()
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Merge an encoded update. Either the whole update applies or, on
    /// error, the document is left untouched.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<ApplySummary, DecodeError> {
        let update = Update::decode(bytes)?;
        self.merge(update)
    }

    /// Merge a decoded update with the same all-or-nothing guarantee.
    pub fn merge(&mut self, update: Update) -> Result<ApplySummary, DecodeError> {
        self.validate(&update)?;

        let known = self.vector.clone();
        let mut summary = ApplySummary::default();

        let mut inserts: Vec<&InsertOp> = update
            .inserts
            .iter()
            .filter(|op| !known.covers(&op.stamp))
            .collect();
        // Origins always carry a lower Lamport time, so stamp order integrates
        // every origin before the records placed after it.
        inserts.sort_by(|a, b| a.stamp.cmp(&b.stamp));
        for op in inserts {
            if !self.records.contains_key(&op.id) {
                self.integrate_insert(op);
                summary.inserted += 1;
            }
        }

        for op in update.sets.iter().filter(|op| !known.covers(&op.stamp)) {
            if self.apply_field(&op.record, &op.patch, op.stamp.clone()) {
                summary.fields_changed += 1;
            }
        }

        for op in update.deletes.iter().filter(|op| !known.covers(&op.stamp)) {
            if let Some(entry) = self.records.get_mut(&op.record) {
                let was_live = entry.is_live();
                if entry.tombstone(op.stamp.clone()) && was_live {
                    summary.deleted += 1;
                }
            }
        }

        for op in update.meta.iter().filter(|op| !known.covers(&op.stamp)) {
            if self
                .meta
                .entry(op.key.clone())
                .or_default()
                .set(op.value.clone(), op.stamp.clone())
            {
                summary.metadata_changed += 1;
            }
        }

        self.vector.merge(&update.vector);
        self.lamport = self.lamport.max(update.lamport);
        Ok(summary)
    }

    /// Check that `update` can be applied in full without touching state.
    fn validate(&self, update: &Update) -> Result<(), DecodeError> {
        if !self.vector.dominates(&update.base) {
            return Err(DecodeError::MissingDependencies);
        }

        if update.lamport > MAX_CLOCK {
            return Err(DecodeError::ClockOutOfRange(update.lamport));
        }
        if let Some((_, &seq)) = update.vector.iter().find(|(_, &seq)| seq > MAX_CLOCK) {
            return Err(DecodeError::ClockOutOfRange(seq));
        }

        let mut seen: HashSet<(&str, u64)> = HashSet::new();
        for stamp in update.stamps() {
            if stamp.seq == 0 || stamp.lamport == 0 || !update.vector.covers(stamp) {
                return Err(DecodeError::StampOutsideVector(stamp.clone()));
            }
            if stamp.lamport > update.lamport {
                return Err(DecodeError::Malformed(format!(
                    "operation {stamp} is newer than the update clock {}",
                    update.lamport
                )));
            }
            if !seen.insert((stamp.replica.as_str(), stamp.seq)) {
                return Err(DecodeError::Malformed(format!(
                    "operation {stamp} appears twice"
                )));
            }
        }

        let mut incoming: HashMap<&RecordId, &InsertOp> = HashMap::new();
        for op in update.inserts.iter().filter(|op| !self.vector.covers(&op.stamp)) {
            if self.records.contains_key(&op.id) || incoming.insert(&op.id, op).is_some() {
                return Err(DecodeError::DuplicateRecord(op.id.to_string()));
            }
        }

        for op in incoming.values() {
            let Some(origin) = &op.origin else { continue };
            let origin_stamp = match (self.records.get(origin), incoming.get(origin)) {
                (Some(entry), _) => &entry.inserted,
                (None, Some(other)) => &other.stamp,
                (None, None) => {
                    return Err(DecodeError::UnknownOrigin {
                        record: op.id.to_string(),
                        origin: origin.to_string(),
                    })
                }
            };
            if origin_stamp.lamport >= op.stamp.lamport {
                return Err(DecodeError::OriginNotBefore {
                    record: op.id.to_string(),
                    origin: origin.to_string(),
                });
            }
        }

        let targets = update
            .sets
            .iter()
            .filter(|op| !self.vector.covers(&op.stamp))
            .map(|op| &op.record)
            .chain(
                update
                    .deletes
                    .iter()
                    .filter(|op| !self.vector.covers(&op.stamp))
                    .map(|op| &op.record),
            );
        for record in targets {
            if !self.records.contains_key(record) && !incoming.contains_key(record) {
                return Err(DecodeError::UnknownRecord(record.to_string()));
            }
        }

        Ok(())
    }

    fn integrate_insert(&mut self, op: &InsertOp) {
        let siblings = match &op.origin {
            None => &mut self.roots,
            Some(origin) => self.children.entry(origin.clone()).or_default(),
        };
        let records = &self.records;
        let pos = siblings
            .iter()
            .position(|s| records.get(s).map_or(true, |e| e.inserted < op.stamp))
            .unwrap_or(siblings.len());
        siblings.insert(pos, op.id.clone());

        self.records.insert(op.id.clone(), RecordEntry::new(op));
        self.lamport = self.lamport.max(op.stamp.lamport);
    }

    fn apply_field(&mut self, id: &RecordId, patch: &FieldPatch, stamp: Stamp) -> bool {
        self.records
            .get_mut(id)
            .is_some_and(|entry| entry.apply(patch, stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(doc: &TaskDocument) -> Vec<String> {
        doc.list_records().into_iter().map(|r| r.content).collect()
    }

    /// Ship everything `to` is missing from `from`.
    fn sync_into(from: &TaskDocument, to: &mut TaskDocument) {
        let delta = from.encode_update_since(to.state_vector()).unwrap();
        to.apply_update(&delta).unwrap();
    }

    #[test]
    fn test_push_and_list() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("Buy milk");
        doc.push_record("Call Bob");

        assert_eq!(contents(&doc), vec!["Buy milk", "Call Bob"]);
        let orders: Vec<_> = doc.list_records().iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_insert_at_position() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("a");
        doc.push_record("c");
        doc.insert_record("b", 1);
        doc.insert_record("first", 0);

        assert_eq!(contents(&doc), vec!["first", "a", "b", "c"]);
    }

    #[test]
    fn test_insert_position_is_clamped() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("a");
        doc.insert_record("z", 99);
        assert_eq!(contents(&doc), vec!["a", "z"]);
    }

    #[test]
    fn test_insert_with_duplicate_id_is_rejected() {
        let mut doc = TaskDocument::new("r1");
        let id = RecordId::from("fixed");
        assert!(doc.insert_with(NewRecord::new("a").with_id(id.clone()), 0).is_some());
        assert!(doc.insert_with(NewRecord::new("b").with_id(id), 0).is_none());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_update_record() {
        let mut doc = TaskDocument::new("r1");
        let id = doc.push_record("Buy milk");

        assert!(doc.update_record(&id, &RecordPatch::new().content("Buy oat milk").completed(true)));
        let record = doc.get_record(&id).unwrap();
        assert_eq!(record.content, "Buy oat milk");
        assert!(record.completed);
        assert!(record.updated_at >= record.created_at);

        assert!(!doc.update_record(&RecordId::from("missing"), &RecordPatch::new().completed(true)));
    }

    #[test]
    fn test_delete_record() {
        let mut doc = TaskDocument::new("r1");
        let id = doc.push_record("Buy milk");

        assert!(doc.delete_record(&id));
        assert!(!doc.delete_record(&id));
        assert!(doc.get_record(&id).is_none());
        assert!(!doc.update_record(&id, &RecordPatch::new().content("x")));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_mutations_advance_clock_and_metadata() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("a");
        assert!(doc.state_vector().get("r1") > 0);
        assert!(doc.last_modified().is_some());
    }

    #[test]
    fn test_seeded_document() {
        let doc = TaskDocument::seeded(
            "server",
            "list-1",
            vec![NewRecord::new("Buy milk").order(0), NewRecord::new("Call Bob").order(1)],
        );
        assert_eq!(doc.parent_collection(), Some("list-1"));
        assert_eq!(contents(&doc), vec!["Buy milk", "Call Bob"]);
    }

    #[test]
    fn test_concurrent_appends_converge() {
        let mut a = TaskDocument::new("replica-a");
        a.push_record("base");
        let mut b = TaskDocument::from_state("replica-b", &a.encode_full_state().unwrap()).unwrap();

        a.push_record("from a");
        b.push_record("from b");

        let a_state = a.clone();
        sync_into(&b, &mut a);
        sync_into(&a_state, &mut b);

        assert_eq!(contents(&a), contents(&b));
        assert_eq!(a.encode_full_state().unwrap(), b.encode_full_state().unwrap());
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_concurrent_field_writes_resolve_by_stamp() {
        let mut a = TaskDocument::new("replica-a");
        let id = a.push_record("task");
        let mut b = TaskDocument::from_state("replica-b", &a.encode_full_state().unwrap()).unwrap();

        a.update_record(&id, &RecordPatch::new().order(5));
        b.update_record(&id, &RecordPatch::new().order(9));

        let a_state = a.clone();
        sync_into(&b, &mut a);
        sync_into(&a_state, &mut b);

        // Equal Lamport times: the higher replica id wins.
        assert_eq!(a.get_record(&id).unwrap().order, 9);
        assert_eq!(b.get_record(&id).unwrap().order, 9);
    }

    #[test]
    fn test_delete_wins_over_concurrent_edit() {
        let mut a = TaskDocument::new("replica-a");
        let id = a.push_record("task");
        let mut b = TaskDocument::from_state("replica-b", &a.encode_full_state().unwrap()).unwrap();

        a.delete_record(&id);
        b.update_record(&id, &RecordPatch::new().completed(true));

        let a_state = a.clone();
        sync_into(&b, &mut a);
        sync_into(&a_state, &mut b);

        assert!(a.is_empty());
        assert!(b.is_empty());
        assert_eq!(a.encode_full_state().unwrap(), b.encode_full_state().unwrap());
    }

    #[test]
    fn test_delta_since_current_vector_is_empty() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("a");
        let delta = doc.delta_since(&doc.state_vector().clone());
        assert!(delta.is_empty());
        assert!(!doc.has_changes_since(doc.state_vector()));
    }

    #[test]
    fn test_malformed_update_leaves_state_unchanged() {
        let mut doc = TaskDocument::new("r1");
        doc.push_record("a");
        let before = doc.clone();

        assert!(doc.apply_update(&[0xFF, 0x00, 0x13]).is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_update_with_unknown_target_is_rejected_atomically() {
        let mut source = TaskDocument::new("r2");
        source.push_record("ok");
        let mut update = source.delta_since(&StateVector::new());
        update.sets.push(SetOp {
            record: RecordId::from("ghost"),
            stamp: Stamp::new(source.lamport() + 1, "r2", source.state_vector().get("r2") + 1),
            patch: FieldPatch::Completed(true),
        });
        update.vector.observe("r2", source.state_vector().get("r2") + 1);
        update.lamport += 1;

        let mut doc = TaskDocument::new("r1");
        let err = doc.merge(update).unwrap_err();
        assert_eq!(err, DecodeError::UnknownRecord("ghost".to_string()));
        assert!(doc.is_empty());
        assert!(doc.state_vector().is_empty());
    }

    #[test]
    fn test_oversized_clock_is_rejected_and_local_edits_continue() {
        let mut source = TaskDocument::new("r2");
        source.push_record("a");
        let mut update = source.delta_since(&StateVector::new());
        update.lamport = u64::MAX;

        let mut doc = TaskDocument::new("r1");
        doc.push_record("mine");
        let before = doc.clone();
        assert_eq!(
            doc.apply_update(&update.encode().unwrap()),
            Err(DecodeError::ClockOutOfRange(u64::MAX))
        );
        assert_eq!(doc, before);

        doc.push_record("still editable");
        assert_eq!(doc.len(), 2);
        assert!(doc.lamport() < MAX_CLOCK);
    }

    #[test]
    fn test_oversized_sequence_is_rejected() {
        let mut source = TaskDocument::new("r2");
        source.push_record("a");
        let mut update = source.delta_since(&StateVector::new());
        update.vector.observe("r1", u64::MAX);

        let mut doc = TaskDocument::new("r1");
        assert_eq!(
            doc.merge(update),
            Err(DecodeError::ClockOutOfRange(u64::MAX))
        );
        assert_eq!(doc.state_vector().get("r1"), 0);
    }

    #[test]
    fn test_stamp_newer_than_update_clock_is_rejected() {
        let mut source = TaskDocument::new("r2");
        source.push_record("a");
        let mut update = source.delta_since(&StateVector::new());
        update.inserts[0].stamp.lamport = MAX_CLOCK + 7;

        let mut doc = TaskDocument::new("r1");
        assert!(matches!(doc.merge(update), Err(DecodeError::Malformed(_))));
        assert_eq!(doc.lamport(), 0);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_stamp_outside_vector_is_rejected() {
        let mut source = TaskDocument::new("r2");
        source.push_record("a");
        let mut update = source.delta_since(&StateVector::new());
        update.vector = StateVector::new();

        let mut doc = TaskDocument::new("r1");
        assert!(matches!(
            doc.merge(update),
            Err(DecodeError::StampOutsideVector(_))
        ));
    }
}
