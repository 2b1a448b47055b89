//! Ordered index over a single field.
//!
//! Records are kept in a vector sorted by the key field. Range lookups are two
//! binary searches; insertion is a binary search plus a shift.
//!
//! Edits made through this index's own edit cursor leave the vector untouched
//! until the writer closes: changed and deleted positions are recorded and
//! resolved in one compaction pass, followed by reinsertion of the changed
//! records. Edits made through other indices are applied on the spot.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::atomic::{self, AtomicUsize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{Bound, IndexBase, IndexId};
use crate::arena::{RecordArena, RecordId};
use crate::config::StoreConfig;
use crate::mapping::{Field, FieldId};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

/// Ordered index state owned by the storage.
#[derive(Debug)]
pub(crate) struct OrderedIndex {
    id: IndexId,
    field_id: FieldId,
    field: Field,
    records: Vec<RecordId>,
    changed_records: Vec<(usize, RecordId)>,
    deleted_record_indices: Vec<usize>,
    has_edit_cursor: bool,
    mass_insertion: bool,
    active_cursors: AtomicUsize,
}

impl OrderedIndex {
    pub(crate) fn new(id: IndexId, field_id: FieldId, field: Field) -> Self {
        Self {
            id,
            field_id,
            field,
            records: Vec::new(),
            changed_records: Vec::new(),
            deleted_record_indices: Vec::new(),
            has_edit_cursor: false,
            mass_insertion: false,
            active_cursors: AtomicUsize::new(0),
        }
    }

    /// Records in key order.
    pub(crate) fn records(&self) -> &[RecordId] {
        &self.records
    }

    pub(crate) fn begin_mass_insertion(&mut self) {
        assert!(!self.mass_insertion, "mass insertion is already in progress");
        self.mass_insertion = true;
    }

    pub(crate) fn finish_mass_insertion(&mut self, records: &RecordArena) {
        assert!(self.mass_insertion, "mass insertion is not in progress");
        self.mass_insertion = false;
        self.sort(records);
    }

    fn key<'r>(&self, records: &'r RecordArena, record: RecordId) -> &'r [u8] {
        self.field.value(records.get(record))
    }

    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        self.field.compare_values(left, right)
    }

    fn lower_bound(&self, records: &RecordArena, value: &[u8]) -> usize {
        self.records
            .partition_point(|record| self.compare(self.key(records, *record), value) == Ordering::Less)
    }

    fn upper_bound(&self, records: &RecordArena, value: &[u8]) -> usize {
        self.records
            .partition_point(|record| self.compare(self.key(records, *record), value) != Ordering::Greater)
    }

    /// Positions of records with keys inside `[min, max]`.
    fn range(&self, records: &RecordArena, min: Bound<'_>, max: Bound<'_>) -> Range<usize> {
        for bound in [min, max].into_iter().flatten() {
            assert_eq!(bound.len(), self.field.size, "bound size must match the key field size");
        }
        if let (Some(min), Some(max)) = (min, max) {
            assert_ne!(
                self.compare(min, max),
                Ordering::Greater,
                "lookup lower bound exceeds upper bound"
            );
        }

        let start = min.map_or(0, |min| self.lower_bound(records, min));
        let end = max.map_or(self.records.len(), |max| self.upper_bound(records, max));
        start..end
    }

    /// Finds the position of `record`, whose key is `backup_value` in the sorted order.
    fn locate(&self, records: &RecordArena, record: RecordId, backup_value: &[u8]) -> usize {
        let start = self.records.partition_point(|candidate| {
            let value = if *candidate == record {
                backup_value
            } else {
                self.key(records, *candidate)
            };
            self.compare(value, backup_value) == Ordering::Less
        });

        let offset = self.records[start..]
            .iter()
            .position(|candidate| *candidate == record)
            .unwrap_or_else(|| panic!("record {record:?} is missing from ordered index {:?}", self.id));
        start + offset
    }

    fn insert_sorted(&mut self, record: RecordId, records: &RecordArena) {
        let value = self.key(records, record);
        let position = self.upper_bound(records, value);
        self.records.insert(position, record);
    }

    fn sort(&mut self, records: &RecordArena) {
        let field = &self.field;
        let compare = |left: &RecordId, right: &RecordId| {
            field.compare_values(field.value(records.get(*left)), field.value(records.get(*right)))
        };

        #[cfg(feature = "parallel")]
        self.records.par_sort_by(compare);

        #[cfg(not(feature = "parallel"))]
        self.records.sort_by(compare);
    }

    fn open_edit_cursor(&mut self) {
        assert!(!self.has_edit_cursor, "ordered index already has an edit cursor");
        self.has_edit_cursor = true;
        *self.active_cursors.get_mut() += 1;
    }

    fn close_edit_cursor(&mut self) {
        *self.active_cursors.get_mut() -= 1;
    }

    fn on_record_changed_by_me(&mut self, position: usize, record: RecordId) {
        debug_assert!(self.has_edit_cursor);
        self.changed_records.push((position, record));
    }

    fn on_record_deleted_by_me(&mut self, position: usize) {
        debug_assert!(self.has_edit_cursor);
        self.deleted_record_indices.push(position);
    }
}

impl IndexBase for OrderedIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn indexed_fields(&self) -> &[FieldId] {
        std::slice::from_ref(&self.field_id)
    }

    fn can_be_dropped(&self) -> bool {
        self.active_cursors.load(atomic::Ordering::Acquire) == 0
            && !self.mass_insertion
            && !self.has_edit_cursor
    }

    fn insert_record(&mut self, record: RecordId, records: &RecordArena) {
        if self.mass_insertion {
            self.records.push(record);
        } else {
            self.insert_sorted(record, records);
        }
    }

    fn on_record_changed(&mut self, record: RecordId, backup: &[u8], records: &RecordArena) {
        assert!(!self.has_edit_cursor, "ordered index with an edit cursor was notified about a change");
        let position = self.locate(records, record, self.field.value(backup));
        self.records.remove(position);
        self.insert_sorted(record, records);
    }

    fn on_record_deleted(&mut self, record: RecordId, backup: &[u8], records: &RecordArena) {
        assert!(!self.has_edit_cursor, "ordered index with an edit cursor was notified about a deletion");
        let position = self.locate(records, record, self.field.value(backup));
        self.records.remove(position);
    }

    fn on_writer_closed(&mut self, records: &RecordArena, config: &StoreConfig) {
        if !self.has_edit_cursor {
            return;
        }
        self.has_edit_cursor = false;

        if self.changed_records.is_empty() && self.deleted_record_indices.is_empty() {
            return;
        }

        let mut removed: Vec<usize> = self
            .deleted_record_indices
            .drain(..)
            .chain(self.changed_records.iter().map(|(position, _)| *position))
            .collect();
        removed.sort_unstable();
        debug_assert!(removed.windows(2).all(|pair| pair[0] != pair[1]));

        let mut pending = removed.iter().peekable();
        let mut position = 0;
        self.records.retain(|_| {
            let keep = pending.peek() != Some(&&position);
            if !keep {
                pending.next();
            }
            position += 1;
            keep
        });

        let changed: Vec<RecordId> = self
            .changed_records
            .drain(..)
            .map(|(_, record)| record)
            .collect();
        let reinserted = changed.len();
        let full_resort = reinserted * config.ordered_full_resort_ratio >= self.records.len();

        if full_resort {
            let mut inserter = MassInsertionExecutor::new(self, records);
            for record in changed {
                inserter.insert_record(record);
            }
        } else {
            for record in changed {
                self.insert_sorted(record, records);
            }
        }

        tracing::trace!(
            "Ordered index {:?} flushed {} deleted and {} changed records (full resort: {})",
            self.id,
            removed.len() - reinserted,
            reinserted,
            full_resort
        );
    }
}

/// Scoped bulk insertion into an ordered index.
///
/// Records are appended unsorted while the executor lives and sorted once
/// when it is dropped.
pub(crate) struct MassInsertionExecutor<'a> {
    index: &'a mut OrderedIndex,
    records: &'a RecordArena,
}

impl<'a> MassInsertionExecutor<'a> {
    pub(crate) fn new(index: &'a mut OrderedIndex, records: &'a RecordArena) -> Self {
        index.begin_mass_insertion();
        Self { index, records }
    }

    pub(crate) fn insert_record(&mut self, record: RecordId) {
        self.index.records.push(record);
    }
}

impl Drop for MassInsertionExecutor<'_> {
    fn drop(&mut self) {
        self.index.finish_mass_insertion(self.records);
    }
}

/// Read access to an ordered index.
#[derive(Debug, Clone, Copy)]
pub struct OrderedIndexRef<'a> {
    storage: &'a Storage,
    index: &'a OrderedIndex,
}

impl<'a> OrderedIndexRef<'a> {
    pub(crate) fn new(storage: &'a Storage, slot: usize) -> Self {
        Self {
            storage,
            index: &storage.indices.ordered[slot].index,
        }
    }

    /// Returns the key field.
    pub fn indexed_field(&self) -> FieldId {
        self.index.field_id
    }

    /// Returns the number of indexed records.
    pub fn len(&self) -> usize {
        self.index.records.len()
    }

    /// Returns `true` if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.records.is_empty()
    }

    /// Returns `true` when no cursor is open and no bulk operation is pending.
    pub fn can_be_dropped(&self) -> bool {
        self.index.can_be_dropped()
    }

    /// Reads records with keys in `[min, max]` from the smallest key up.
    ///
    /// # Arguments
    /// * `min` - Inclusive lower bound, `None` for unbounded
    /// * `max` - Inclusive upper bound, `None` for unbounded
    ///
    /// # Panics
    /// Panics if both bounds are given and `min` is greater than `max`.
    pub fn lookup_to_read_ascending(&self, min: Bound<'_>, max: Bound<'_>) -> OrderedReadCursor<'a> {
        OrderedReadCursor::new(self.storage, self.index, min, max, Direction::Ascending)
    }

    /// Reads records with keys in `[min, max]` from the largest key down.
    pub fn lookup_to_read_descending(&self, min: Bound<'_>, max: Bound<'_>) -> OrderedReadCursor<'a> {
        OrderedReadCursor::new(self.storage, self.index, min, max, Direction::Descending)
    }
}

/// Edit access to an ordered index.
#[derive(Debug)]
pub struct OrderedIndexMut<'a> {
    storage: &'a mut Storage,
    slot: usize,
}

impl<'a> OrderedIndexMut<'a> {
    pub(crate) fn new(storage: &'a mut Storage, slot: usize) -> Self {
        Self { storage, slot }
    }

    /// Edits records with keys in `[min, max]` from the smallest key up.
    ///
    /// Key changes made through the cursor are applied to the index when the
    /// cursor closes, so the cursor keeps walking the previous order.
    pub fn lookup_to_edit_ascending(self, min: Bound<'_>, max: Bound<'_>) -> OrderedEditCursor<'a> {
        OrderedEditCursor::new(self.storage, self.slot, min, max, Direction::Ascending)
    }

    /// Edits records with keys in `[min, max]` from the largest key down.
    pub fn lookup_to_edit_descending(self, min: Bound<'_>, max: Bound<'_>) -> OrderedEditCursor<'a> {
        OrderedEditCursor::new(self.storage, self.slot, min, max, Direction::Descending)
    }
}

/// Shared cursor over an ordered range.
#[derive(Debug)]
pub struct OrderedReadCursor<'a> {
    storage: &'a Storage,
    index: &'a OrderedIndex,
    range: Range<usize>,
    direction: Direction,
}

impl<'a> OrderedReadCursor<'a> {
    fn new(
        storage: &'a Storage,
        index: &'a OrderedIndex,
        min: Bound<'_>,
        max: Bound<'_>,
        direction: Direction,
    ) -> Self {
        let range = index.range(&storage.records, min, max);
        storage.register_reader();
        index.active_cursors.fetch_add(1, atomic::Ordering::AcqRel);
        Self {
            storage,
            index,
            range,
            direction,
        }
    }

    /// Returns the current record, or `None` once the cursor has ended.
    pub fn current(&self) -> Option<&'a [u8]> {
        if self.range.is_empty() {
            return None;
        }

        let position = match self.direction {
            Direction::Ascending => self.range.start,
            Direction::Descending => self.range.end - 1,
        };
        let storage = self.storage;
        Some(storage.records.get(self.index.records[position]))
    }

    /// Moves to the next record.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn advance(&mut self) {
        assert!(!self.range.is_empty(), "cursor has already ended");
        match self.direction {
            Direction::Ascending => self.range.start += 1,
            Direction::Descending => self.range.end -= 1,
        }
    }

    /// Returns `true` once every record in range has been visited.
    pub fn is_ended(&self) -> bool {
        self.range.is_empty()
    }
}

impl Clone for OrderedReadCursor<'_> {
    fn clone(&self) -> Self {
        self.storage.register_reader();
        self.index.active_cursors.fetch_add(1, atomic::Ordering::AcqRel);
        Self {
            storage: self.storage,
            index: self.index,
            range: self.range.clone(),
            direction: self.direction,
        }
    }
}

impl<'a> Iterator for OrderedReadCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.current()?;
        self.advance();
        Some(record)
    }
}

impl Drop for OrderedReadCursor<'_> {
    fn drop(&mut self) {
        self.index.active_cursors.fetch_sub(1, atomic::Ordering::AcqRel);
        self.storage.unregister_reader();
    }
}

/// Exclusive cursor over an ordered range.
///
/// Dropping the cursor (or calling [`close`](OrderedEditCursor::close)) ends
/// the pending edition and repositions every record whose key changed.
#[derive(Debug)]
pub struct OrderedEditCursor<'a> {
    storage: &'a mut Storage,
    slot: usize,
    id: IndexId,
    range: Range<usize>,
    direction: Direction,
}

impl<'a> OrderedEditCursor<'a> {
    fn new(
        storage: &'a mut Storage,
        slot: usize,
        min: Bound<'_>,
        max: Bound<'_>,
        direction: Direction,
    ) -> Self {
        let range = storage.indices.ordered[slot]
            .index
            .range(&storage.records, min, max);
        storage.register_writer();
        let index = &mut storage.indices.ordered[slot].index;
        index.open_edit_cursor();
        let id = index.id;

        let mut cursor = Self {
            storage,
            slot,
            id,
            range,
            direction,
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
        let position = self.position().unwrap_or_else(|| panic!("cursor has already ended"));
        self.end_current(position);
        self.step();
        self.begin_current();
    }

    /// Deletes the current record from the storage and moves to the next one.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn delete_current(&mut self) {
        let position = self.position().unwrap_or_else(|| panic!("cursor has already ended"));
        let record = self.index().records[position];
        self.index_mut().on_record_deleted_by_me(position);
        self.storage.delete_record(record, Some(self.id));
        self.step();
        self.begin_current();
    }

    /// Returns `true` once every record in range has been visited.
    pub fn is_ended(&self) -> bool {
        self.range.is_empty()
    }

    /// Closes the cursor, applying deferred repositioning.
    pub fn close(self) {}

    fn index(&self) -> &OrderedIndex {
        &self.storage.indices.ordered[self.slot].index
    }

    fn index_mut(&mut self) -> &mut OrderedIndex {
        &mut self.storage.indices.ordered[self.slot].index
    }

    fn position(&self) -> Option<usize> {
        if self.range.is_empty() {
            return None;
        }
        Some(match self.direction {
            Direction::Ascending => self.range.start,
            Direction::Descending => self.range.end - 1,
        })
    }

    fn current_record(&self) -> Option<RecordId> {
        self.position().map(|position| self.index().records[position])
    }

    fn step(&mut self) {
        match self.direction {
            Direction::Ascending => self.range.start += 1,
            Direction::Descending => self.range.end -= 1,
        }
    }

    fn begin_current(&mut self) {
        if let Some(record) = self.current_record() {
            self.storage.begin_record_edition(record);
        }
    }

    fn end_current(&mut self, position: usize) {
        let record = self.index().records[position];
        if self.storage.end_record_edition(record, Some(self.id)) {
            self.index_mut().on_record_changed_by_me(position, record);
        }
    }
}

impl Drop for OrderedEditCursor<'_> {
    fn drop(&mut self) {
        if let Some(position) = self.position() {
            self.end_current(position);
        }
        self.index_mut().close_edit_cursor();
        self.storage.unregister_writer();
    }
}
