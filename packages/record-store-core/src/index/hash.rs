//! Hash index over one or more fields.
//!
//! Buckets are keyed by the normalized bytes of the key fields. A lookup
//! request lays the field values out one after another, each taking the
//! field's size.

use std::collections::HashMap;
use std::sync::atomic::{self, AtomicUsize};

use super::{IndexBase, IndexId};
use crate::arena::{RecordArena, RecordId};
use crate::config::StoreConfig;
use crate::mapping::{Field, FieldId};
use crate::storage::Storage;

/// Hash index state owned by the storage.
#[derive(Debug)]
pub(crate) struct HashIndex {
    id: IndexId,
    field_ids: Vec<FieldId>,
    fields: Vec<Field>,
    buckets: HashMap<Box<[u8]>, Vec<RecordId>>,
    /// Records removed from their bucket after a key change, reinserted at writer close.
    changed_records: Vec<RecordId>,
    active_cursors: AtomicUsize,
}

impl HashIndex {
    pub(crate) fn new(id: IndexId, field_ids: Vec<FieldId>, fields: Vec<Field>, initial_buckets: usize) -> Self {
        Self {
            id,
            field_ids,
            fields,
            buckets: HashMap::with_capacity(initial_buckets),
            changed_records: Vec::new(),
            active_cursors: AtomicUsize::new(0),
        }
    }

    /// Builds the bucket key of a stored record.
    fn record_key(&self, record: &[u8]) -> Box<[u8]> {
        let mut key = Vec::new();
        for field in &self.fields {
            field.append_key(field.value(record), &mut key);
        }
        key.into_boxed_slice()
    }

    /// Builds the bucket key of a lookup request.
    fn request_key(&self, request: &[u8]) -> Box<[u8]> {
        let expected: usize = self.fields.iter().map(|field| field.size).sum();
        assert_eq!(request.len(), expected, "lookup request size must match the key fields");

        let mut key = Vec::new();
        let mut offset = 0;
        for field in &self.fields {
            field.append_key(&request[offset..offset + field.size], &mut key);
            offset += field.size;
        }
        key.into_boxed_slice()
    }

    /// Removes `record` from the bucket under `key` and returns the position it had.
    fn remove_from_bucket(&mut self, key: &[u8], record: RecordId) -> usize {
        let bucket = self
            .buckets
            .get_mut(key)
            .unwrap_or_else(|| panic!("record {record:?} is missing from hash index {:?}", self.id));
        let position = bucket
            .iter()
            .position(|candidate| *candidate == record)
            .unwrap_or_else(|| panic!("record {record:?} is missing from hash index {:?}", self.id));
        bucket.remove(position);
        position
    }

    fn defer_reinsertion(&mut self, record: RecordId) {
        debug_assert!(
            !self.changed_records.contains(&record),
            "record {record:?} changed twice during one writer session"
        );
        self.changed_records.push(record);
    }
}

impl IndexBase for HashIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn indexed_fields(&self) -> &[FieldId] {
        &self.field_ids
    }

    fn can_be_dropped(&self) -> bool {
        self.active_cursors.load(atomic::Ordering::Acquire) == 0
    }

    fn insert_record(&mut self, record: RecordId, records: &RecordArena) {
        let key = self.record_key(records.get(record));
        self.buckets.entry(key).or_default().push(record);
    }

    fn on_record_changed(&mut self, record: RecordId, backup: &[u8], _records: &RecordArena) {
        let key = self.record_key(backup);
        self.remove_from_bucket(&key, record);
        self.defer_reinsertion(record);
    }

    fn on_record_deleted(&mut self, record: RecordId, backup: &[u8], _records: &RecordArena) {
        let key = self.record_key(backup);
        self.remove_from_bucket(&key, record);
    }

    fn on_writer_closed(&mut self, records: &RecordArena, _config: &StoreConfig) {
        let reinserted = self.changed_records.len();
        for record in std::mem::take(&mut self.changed_records) {
            self.insert_record(record, records);
        }

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        if reinserted > 0 || before != self.buckets.len() {
            tracing::trace!(
                "Hash index {:?} reinserted {} records and pruned {} buckets",
                self.id,
                reinserted,
                before - self.buckets.len()
            );
        }
    }
}

/// Read access to a hash index.
#[derive(Debug, Clone, Copy)]
pub struct HashIndexRef<'a> {
    storage: &'a Storage,
    index: &'a HashIndex,
}

impl<'a> HashIndexRef<'a> {
    pub(crate) fn new(storage: &'a Storage, slot: usize) -> Self {
        Self {
            storage,
            index: &storage.indices.hash[slot].index,
        }
    }

    /// Returns the key fields in request order.
    pub fn indexed_fields(&self) -> &'a [FieldId] {
        &self.index.field_ids
    }

    /// Returns `true` when no cursor is open.
    pub fn can_be_dropped(&self) -> bool {
        self.index.can_be_dropped()
    }

    /// Reads every record whose key fields equal `request`.
    ///
    /// # Arguments
    /// * `request` - Key field values laid out one after another. Bit fields
    ///   take one byte tested against the field's bit mask.
    ///
    /// # Panics
    /// Panics if the request size differs from the sum of key field sizes.
    pub fn lookup_to_read(&self, request: &[u8]) -> HashReadCursor<'a> {
        let key = self.index.request_key(request);
        let bucket = self
            .index
            .buckets
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default();
        HashReadCursor::new(self.storage, self.index, bucket)
    }
}

/// Edit access to a hash index.
#[derive(Debug)]
pub struct HashIndexMut<'a> {
    storage: &'a mut Storage,
    slot: usize,
}

impl<'a> HashIndexMut<'a> {
    pub(crate) fn new(storage: &'a mut Storage, slot: usize) -> Self {
        Self { storage, slot }
    }

    /// Edits every record whose key fields equal `request`.
    ///
    /// Records whose key changes leave the bucket immediately and rejoin the
    /// index when the cursor closes.
    pub fn lookup_to_edit(self, request: &[u8]) -> HashEditCursor<'a> {
        HashEditCursor::new(self.storage, self.slot, request)
    }
}

/// Shared cursor over one hash bucket.
#[derive(Debug)]
pub struct HashReadCursor<'a> {
    storage: &'a Storage,
    index: &'a HashIndex,
    bucket: &'a [RecordId],
    position: usize,
}

impl<'a> HashReadCursor<'a> {
    fn new(storage: &'a Storage, index: &'a HashIndex, bucket: &'a [RecordId]) -> Self {
        storage.register_reader();
        index.active_cursors.fetch_add(1, atomic::Ordering::AcqRel);
        Self {
            storage,
            index,
            bucket,
            position: 0,
        }
    }

    /// Returns the current record, or `None` once the cursor has ended.
    pub fn current(&self) -> Option<&'a [u8]> {
        let storage = self.storage;
        self.bucket
            .get(self.position)
            .map(|record| storage.records.get(*record))
    }

    /// Moves to the next record.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn advance(&mut self) {
        assert!(self.position < self.bucket.len(), "cursor has already ended");
        self.position += 1;
    }

    /// Returns `true` once every matching record has been visited.
    pub fn is_ended(&self) -> bool {
        self.position >= self.bucket.len()
    }
}

impl Clone for HashReadCursor<'_> {
    fn clone(&self) -> Self {
        let mut cursor = Self::new(self.storage, self.index, self.bucket);
        cursor.position = self.position;
        cursor
    }
}

impl<'a> Iterator for HashReadCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.current()?;
        self.position += 1;
        Some(record)
    }
}

impl Drop for HashReadCursor<'_> {
    fn drop(&mut self) {
        self.index.active_cursors.fetch_sub(1, atomic::Ordering::AcqRel);
        self.storage.unregister_reader();
    }
}

/// Exclusive cursor over one hash bucket.
#[derive(Debug)]
pub struct HashEditCursor<'a> {
    storage: &'a mut Storage,
    slot: usize,
    id: IndexId,
    key: Box<[u8]>,
    position: usize,
}

impl<'a> HashEditCursor<'a> {
    fn new(storage: &'a mut Storage, slot: usize, request: &[u8]) -> Self {
        let key = storage.indices.hash[slot].index.request_key(request);
        storage.register_writer();
        let index = &mut storage.indices.hash[slot].index;
        let id = index.id;
        *index.active_cursors.get_mut() += 1;

        let mut cursor = Self {
            storage,
            slot,
            id,
            key,
            position: 0,
        };
        cursor.begin_current();
        cursor
    }

    /// Returns the current record for modification.
    pub fn current(&mut self) -> Option<&mut [u8]> {
        let record = self.current_record()?;
        Some(self.storage.records.get_mut(record))
    }

    /// Finishes editing the current record and moves to the next one.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn advance(&mut self) {
        let record = self
            .current_record()
            .unwrap_or_else(|| panic!("cursor has already ended"));
        self.end_current(record);
        self.begin_current();
    }

    /// Deletes the current record from the storage and moves to the next one.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn delete_current(&mut self) {
        let record = self
            .current_record()
            .unwrap_or_else(|| panic!("cursor has already ended"));
        let position = self.position;
        self.bucket_mut().remove(position);
        self.storage.delete_record(record, Some(self.id));
        self.begin_current();
    }

    /// Returns `true` once every matching record has been visited.
    pub fn is_ended(&self) -> bool {
        self.current_record().is_none()
    }

    /// Closes the cursor, reinserting records whose key changed.
    pub fn close(self) {}

    fn index(&self) -> &HashIndex {
        &self.storage.indices.hash[self.slot].index
    }

    fn index_mut(&mut self) -> &mut HashIndex {
        &mut self.storage.indices.hash[self.slot].index
    }

    fn bucket_mut(&mut self) -> &mut Vec<RecordId> {
        let index = &mut self.storage.indices.hash[self.slot].index;
        index
            .buckets
            .get_mut(&self.key)
            .unwrap_or_else(|| panic!("hash bucket vanished while an edit cursor was open"))
    }

    fn current_record(&self) -> Option<RecordId> {
        self.index()
            .buckets
            .get(&self.key)
            .and_then(|bucket| bucket.get(self.position))
            .copied()
    }

    fn begin_current(&mut self) {
        if let Some(record) = self.current_record() {
            self.storage.begin_record_edition(record);
        }
    }

    /// Ends the edition of `record`; a record whose key changed leaves the bucket.
    fn end_current(&mut self, record: RecordId) {
        if self.storage.end_record_edition(record, Some(self.id)) {
            let position = self.position;
            self.bucket_mut().remove(position);
            self.index_mut().defer_reinsertion(record);
        } else {
            self.position += 1;
        }
    }
}

impl Drop for HashEditCursor<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.current_record() {
            self.end_current(record);
        }
        *self.index_mut().active_cursors.get_mut() -= 1;
        self.storage.unregister_writer();
    }
}
