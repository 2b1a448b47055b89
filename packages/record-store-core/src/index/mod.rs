//! Index kinds maintained by a [`Storage`](crate::Storage).
//!
//! Every index keeps [`RecordId`] slots only and never owns record memory.
//! The storage drives them through [`IndexBase`]: records are inserted after
//! allocation, changed or deleted records are reported with the backup copy
//! taken when their edition began, and deferred work is flushed once the
//! writer closes.

pub mod hash;
pub mod ordered;
pub mod volumetric;

use crate::arena::{RecordArena, RecordId};
use crate::config::StoreConfig;
use crate::mapping::FieldId;

/// Bound of an ordered range lookup: the raw key value, or `None` for unbounded.
pub type Bound<'a> = Option<&'a [u8]>;

/// Bitmask over the storage's indexed field list.
pub(crate) type IndexedFieldMask = u32;

/// Identity of an index inside its storage. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub(crate) u32);

/// Handle to a hash index created by [`Storage::create_hash_index`](crate::Storage::create_hash_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashIndexHandle(pub(crate) IndexId);

/// Handle to an ordered index created by [`Storage::create_ordered_index`](crate::Storage::create_ordered_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderedIndexHandle(pub(crate) IndexId);

/// Handle to a volumetric index created by
/// [`Storage::create_volumetric_index`](crate::Storage::create_volumetric_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumetricIndexHandle(pub(crate) IndexId);

impl HashIndexHandle {
    /// Returns the index identity.
    pub fn id(self) -> IndexId {
        self.0
    }
}

impl OrderedIndexHandle {
    /// Returns the index identity.
    pub fn id(self) -> IndexId {
        self.0
    }
}

impl VolumetricIndexHandle {
    /// Returns the index identity.
    pub fn id(self) -> IndexId {
        self.0
    }
}

/// Notification surface shared by all index kinds.
pub(crate) trait IndexBase {
    fn id(&self) -> IndexId;

    /// Fields whose changes must be reported to this index.
    fn indexed_fields(&self) -> &[FieldId];

    /// Returns `true` when no cursor is open and no bulk operation is pending.
    fn can_be_dropped(&self) -> bool;

    fn insert_record(&mut self, record: RecordId, records: &RecordArena);

    /// Called for indexed field changes made through another index's cursor.
    fn on_record_changed(&mut self, record: RecordId, backup: &[u8], records: &RecordArena);

    /// Called before the arena releases a record deleted through another index's cursor.
    fn on_record_deleted(&mut self, record: RecordId, backup: &[u8], records: &RecordArena);

    fn on_writer_closed(&mut self, records: &RecordArena, config: &StoreConfig);
}

/// Index together with the mask of indexed fields it depends on.
#[derive(Debug)]
pub(crate) struct IndexHolder<I> {
    pub(crate) index: I,
    pub(crate) mask: IndexedFieldMask,
}
