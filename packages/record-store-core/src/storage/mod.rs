//! Record storage: owns the arena and every index over it.
//!
//! All record mutations go through the edition protocol implemented here.
//! An edit cursor begins an edition before handing a record out, ends it when
//! moving away, and the storage diffs the indexed fields against the backup
//! taken at the beginning to decide which indices must hear about the change.

mod allocator;

pub use allocator::RecordAllocator;

#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::arena::{RecordArena, RecordId};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::index::hash::{HashIndex, HashIndexMut, HashIndexRef};
use crate::index::ordered::{MassInsertionExecutor, OrderedIndex, OrderedIndexMut, OrderedIndexRef};
use crate::index::volumetric::{
    Dimension, DimensionDescriptor, VolumetricIndex, VolumetricIndexMut, VolumetricIndexRef,
    MAX_DIMENSIONS,
};
use crate::index::{
    HashIndexHandle, IndexBase, IndexHolder, IndexId, IndexedFieldMask, OrderedIndexHandle,
    VolumetricIndexHandle,
};
use crate::mapping::{Field, FieldId, RecordMapping};

/// Maximum count of distinct fields referenced by all indices together.
pub const MAX_INDEXED_FIELDS: usize = 32;

/// Maximum count of indices of one kind per storage.
pub const MAX_INDICES_OF_SAME_KIND: usize = 8;

const _: () = assert!(IndexedFieldMask::BITS as usize >= MAX_INDEXED_FIELDS);

#[derive(Debug)]
struct IndexedField {
    id: FieldId,
    field: Field,
    usages: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Indices {
    pub(crate) hash: Vec<IndexHolder<HashIndex>>,
    pub(crate) ordered: Vec<IndexHolder<OrderedIndex>>,
    pub(crate) volumetric: Vec<IndexHolder<VolumetricIndex>>,
}

#[derive(Debug, Default)]
struct AccessCounter {
    readers: AtomicUsize,
    writers: usize,
}

/// Storage of records of one mapping plus the indices built over them.
///
/// Read access goes through `&Storage` views and may be shared between
/// threads. Edit cursors and allocators borrow the storage mutably, so at most
/// one writer exists at a time and never alongside readers.
#[derive(Debug)]
pub struct Storage {
    mapping: RecordMapping,
    config: StoreConfig,
    pub(crate) records: RecordArena,
    pub(crate) indices: Indices,
    indexed_fields: Vec<IndexedField>,
    access: AccessCounter,
    edited_record_backup: Box<[u8]>,
    edition: Option<RecordId>,
    #[cfg(debug_assertions)]
    edited_in_session: HashSet<RecordId>,
    next_index_id: u32,
}

impl Storage {
    /// Creates an empty storage with default configuration.
    pub fn new(mapping: RecordMapping) -> Self {
        Self::with_config(mapping, StoreConfig::default())
    }

    /// Creates an empty storage.
    ///
    /// # Arguments
    /// * `mapping` - Layout of stored records
    /// * `config` - Arena and index tuning
    pub fn with_config(mapping: RecordMapping, config: StoreConfig) -> Self {
        let record_size = mapping.object_size();
        tracing::debug!(
            "Created storage: record_size={}, fields={}, records_per_chunk={}",
            record_size,
            mapping.fields().count(),
            config.records_per_chunk
        );

        Self {
            records: RecordArena::new(record_size, config.records_per_chunk),
            indices: Indices::default(),
            indexed_fields: Vec::new(),
            access: AccessCounter::default(),
            edited_record_backup: vec![0u8; record_size].into_boxed_slice(),
            edition: None,
            #[cfg(debug_assertions)]
            edited_in_session: HashSet::new(),
            next_index_id: 0,
            mapping,
            config,
        }
    }

    /// Returns the record mapping.
    pub fn mapping(&self) -> &RecordMapping {
        &self.mapping
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the number of live records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Returns the number of registered readers.
    pub fn active_readers(&self) -> usize {
        self.access.readers.load(Ordering::Acquire)
    }

    /// Starts inserting records one by one.
    ///
    /// Each record is inserted into every index once the allocator moves to
    /// the next record or is dropped.
    pub fn allocate_and_insert(&mut self) -> RecordAllocator<'_> {
        RecordAllocator::new(self, false)
    }

    /// Starts inserting a batch of records.
    ///
    /// Ordered indices append records unsorted and sort once when the
    /// allocator is dropped.
    pub fn allocate_and_insert_in_bulk(&mut self) -> RecordAllocator<'_> {
        RecordAllocator::new(self, true)
    }

    /// Creates a hash index over the concatenation of `fields`.
    ///
    /// # Arguments
    /// * `fields` - Key fields in lookup request order
    ///
    /// # Returns
    /// `Result<HashIndexHandle, StoreError>` identifying the new index.
    pub fn create_hash_index(&mut self, fields: &[FieldId]) -> Result<HashIndexHandle, StoreError> {
        self.assert_no_access();
        if fields.is_empty() {
            return Err(StoreError::EmptyIndexKey);
        }
        check_index_capacity(self.indices.hash.len(), "hash")?;

        let key_fields = fields
            .iter()
            .map(|id| self.mapping.resolve(*id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let mask = self.register_indexed_field_usages(fields)?;

        let id = self.allocate_index_id();
        let mut index = HashIndex::new(id, fields.to_vec(), key_fields, self.config.hash_initial_buckets);
        for record in self.fill_order() {
            index.insert_record(record, &self.records);
        }

        tracing::debug!(
            "Created hash index {:?} over {} fields with {} records",
            id,
            fields.len(),
            self.records.len()
        );
        self.indices.hash.push(IndexHolder { index, mask });
        Ok(HashIndexHandle(id))
    }

    /// Creates an ordered index sorted by `field`.
    pub fn create_ordered_index(&mut self, field: FieldId) -> Result<OrderedIndexHandle, StoreError> {
        self.assert_no_access();
        check_index_capacity(self.indices.ordered.len(), "ordered")?;

        let key_field = self.mapping.resolve(field)?.clone();
        let mask = self.register_indexed_field_usages(&[field])?;

        let id = self.allocate_index_id();
        let mut index = OrderedIndex::new(id, field, key_field);
        let order = self.fill_order();
        {
            let mut inserter = MassInsertionExecutor::new(&mut index, &self.records);
            for record in order {
                inserter.insert_record(record);
            }
        }

        tracing::debug!(
            "Created ordered index {:?} on field {} with {} records",
            id,
            field.index(),
            self.records.len()
        );
        self.indices.ordered.push(IndexHolder { index, mask });
        Ok(OrderedIndexHandle(id))
    }

    /// Creates a volumetric index over the given dimensions.
    ///
    /// All dimension fields must share one numeric archetype and size.
    ///
    /// # Arguments
    /// * `dimensions` - One descriptor per axis, at most [`MAX_DIMENSIONS`]
    ///
    /// # Returns
    /// `Result<VolumetricIndexHandle, StoreError>` identifying the new index.
    pub fn create_volumetric_index(
        &mut self,
        dimensions: &[DimensionDescriptor],
    ) -> Result<VolumetricIndexHandle, StoreError> {
        self.assert_no_access();
        if dimensions.is_empty() || dimensions.len() > MAX_DIMENSIONS {
            return Err(StoreError::InvalidDimensionCount {
                max: MAX_DIMENSIONS,
                got: dimensions.len(),
            });
        }
        check_index_capacity(self.indices.volumetric.len(), "volumetric")?;

        let axis = self.mapping.resolve(dimensions[0].min_field)?;
        if !axis.archetype.is_numeric() {
            return Err(StoreError::UnsupportedAxisField {
                field: axis.name.clone(),
                archetype: axis.archetype,
            });
        }

        let mut resolved = Vec::with_capacity(dimensions.len());
        let mut field_ids = Vec::with_capacity(dimensions.len() * 2);
        for (position, descriptor) in dimensions.iter().enumerate() {
            let min_field = self.mapping.resolve(descriptor.min_field)?;
            let max_field = self.mapping.resolve(descriptor.max_field)?;
            for field in [min_field, max_field] {
                if field.archetype != axis.archetype || field.size != axis.size {
                    return Err(StoreError::MismatchedAxisField {
                        field: field.name.clone(),
                        expected: axis.name.clone(),
                    });
                }
            }

            let (min, max) = (descriptor.global_min_border, descriptor.global_max_border);
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(StoreError::InvalidBorders {
                    dimension: position,
                    min,
                    max,
                });
            }

            resolved.push(Dimension {
                min_field: min_field.clone(),
                global_min_border: min,
                max_field: max_field.clone(),
                global_max_border: max,
            });
            field_ids.push(descriptor.min_field);
            field_ids.push(descriptor.max_field);
        }

        let mask = self.register_indexed_field_usages(&field_ids)?;
        let id = self.allocate_index_id();
        let mut index = VolumetricIndex::new(id, field_ids, resolved);
        for record in self.fill_order() {
            index.insert_record(record, &self.records);
        }

        tracing::debug!(
            "Created volumetric index {:?} with {} dimensions and {} records",
            id,
            dimensions.len(),
            self.records.len()
        );
        self.indices.volumetric.push(IndexHolder { index, mask });
        Ok(VolumetricIndexHandle(id))
    }

    /// Removes a hash index.
    ///
    /// # Panics
    /// Panics if the handle is stale or the index still has open cursors.
    pub fn drop_hash_index(&mut self, handle: HashIndexHandle) {
        self.assert_no_access();
        let slot = slot_of(&self.indices.hash, handle.0);
        assert!(
            self.indices.hash[slot].index.can_be_dropped(),
            "hash index {:?} is still in use",
            handle.0
        );
        let holder = self.indices.hash.swap_remove(slot);
        self.unregister_indexed_field_usages(holder.index.indexed_fields());
        tracing::debug!("Dropped hash index {:?}", handle.0);
    }

    /// Removes an ordered index.
    ///
    /// # Panics
    /// Panics if the handle is stale, the index still has open cursors or a
    /// mass insertion is in progress.
    pub fn drop_ordered_index(&mut self, handle: OrderedIndexHandle) {
        self.assert_no_access();
        let slot = slot_of(&self.indices.ordered, handle.0);
        assert!(
            self.indices.ordered[slot].index.can_be_dropped(),
            "ordered index {:?} is still in use",
            handle.0
        );
        let holder = self.indices.ordered.swap_remove(slot);
        self.unregister_indexed_field_usages(holder.index.indexed_fields());
        tracing::debug!("Dropped ordered index {:?}", handle.0);
    }

    /// Removes a volumetric index.
    ///
    /// # Panics
    /// Panics if the handle is stale or the index still has open cursors.
    pub fn drop_volumetric_index(&mut self, handle: VolumetricIndexHandle) {
        self.assert_no_access();
        let slot = slot_of(&self.indices.volumetric, handle.0);
        assert!(
            self.indices.volumetric[slot].index.can_be_dropped(),
            "volumetric index {:?} is still in use",
            handle.0
        );
        let holder = self.indices.volumetric.swap_remove(slot);
        self.unregister_indexed_field_usages(holder.index.indexed_fields());
        tracing::debug!("Dropped volumetric index {:?}", handle.0);
    }

    /// Iterates over handles of all hash indices.
    pub fn hash_indices(&self) -> impl Iterator<Item = HashIndexHandle> + '_ {
        self.indices
            .hash
            .iter()
            .map(|holder| HashIndexHandle(holder.index.id()))
    }

    /// Iterates over handles of all ordered indices.
    pub fn ordered_indices(&self) -> impl Iterator<Item = OrderedIndexHandle> + '_ {
        self.indices
            .ordered
            .iter()
            .map(|holder| OrderedIndexHandle(holder.index.id()))
    }

    /// Iterates over handles of all volumetric indices.
    pub fn volumetric_indices(&self) -> impl Iterator<Item = VolumetricIndexHandle> + '_ {
        self.indices
            .volumetric
            .iter()
            .map(|holder| VolumetricIndexHandle(holder.index.id()))
    }

    /// Returns a read view of a hash index.
    ///
    /// # Panics
    /// Panics if the handle does not belong to this storage or was dropped.
    pub fn hash(&self, handle: HashIndexHandle) -> HashIndexRef<'_> {
        HashIndexRef::new(self, slot_of(&self.indices.hash, handle.0))
    }

    /// Returns an edit view of a hash index.
    pub fn hash_mut(&mut self, handle: HashIndexHandle) -> HashIndexMut<'_> {
        let slot = slot_of(&self.indices.hash, handle.0);
        HashIndexMut::new(self, slot)
    }

    /// Returns a read view of an ordered index.
    ///
    /// # Panics
    /// Panics if the handle does not belong to this storage or was dropped.
    pub fn ordered(&self, handle: OrderedIndexHandle) -> OrderedIndexRef<'_> {
        OrderedIndexRef::new(self, slot_of(&self.indices.ordered, handle.0))
    }

    /// Returns an edit view of an ordered index.
    pub fn ordered_mut(&mut self, handle: OrderedIndexHandle) -> OrderedIndexMut<'_> {
        let slot = slot_of(&self.indices.ordered, handle.0);
        OrderedIndexMut::new(self, slot)
    }

    /// Returns a read view of a volumetric index.
    ///
    /// # Panics
    /// Panics if the handle does not belong to this storage or was dropped.
    pub fn volumetric(&self, handle: VolumetricIndexHandle) -> VolumetricIndexRef<'_> {
        VolumetricIndexRef::new(self, slot_of(&self.indices.volumetric, handle.0))
    }

    /// Returns an edit view of a volumetric index.
    pub fn volumetric_mut(&mut self, handle: VolumetricIndexHandle) -> VolumetricIndexMut<'_> {
        let slot = slot_of(&self.indices.volumetric, handle.0);
        VolumetricIndexMut::new(self, slot)
    }

    pub(crate) fn register_reader(&self) {
        assert_eq!(self.access.writers, 0, "reader registered while a writer is open");
        self.access.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unregister_reader(&self) {
        let previous = self.access.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "reader unregistered without registration");
    }

    pub(crate) fn register_writer(&mut self) {
        assert_eq!(self.access.writers, 0, "only one writer may be open");
        assert_eq!(
            *self.access.readers.get_mut(),
            0,
            "writer registered while readers are open"
        );
        self.access.writers += 1;
    }

    /// Closes the writer session and lets every index flush deferred work.
    pub(crate) fn unregister_writer(&mut self) {
        assert_eq!(self.access.writers, 1, "writer unregistered without registration");
        debug_assert!(self.edition.is_none(), "writer closed during a record edition");
        self.access.writers -= 1;
        #[cfg(debug_assertions)]
        self.edited_in_session.clear();

        let records = &self.records;
        let config = &self.config;
        for holder in &mut self.indices.hash {
            holder.index.on_writer_closed(records, config);
        }
        for holder in &mut self.indices.ordered {
            holder.index.on_writer_closed(records, config);
        }
        for holder in &mut self.indices.volumetric {
            holder.index.on_writer_closed(records, config);
        }
    }

    pub(crate) fn allocate_record(&mut self) -> RecordId {
        debug_assert_eq!(self.access.writers, 1);
        self.records.acquire(self.mapping.default_record())
    }

    pub(crate) fn insert_record(&mut self, record: RecordId) {
        debug_assert_eq!(self.access.writers, 1);
        let records = &self.records;
        for holder in &mut self.indices.hash {
            holder.index.insert_record(record, records);
        }
        for holder in &mut self.indices.ordered {
            holder.index.insert_record(record, records);
        }
        for holder in &mut self.indices.volumetric {
            holder.index.insert_record(record, records);
        }
    }

    /// Saves a copy of `record` so changes can be detected when the edition ends.
    ///
    /// Every record may be edited at most once per writer session.
    pub(crate) fn begin_record_edition(&mut self, record: RecordId) {
        assert_eq!(self.access.writers, 1, "record edition requires an open writer");
        assert!(self.edition.is_none(), "record edition is already in progress");
        #[cfg(debug_assertions)]
        {
            let first_edition = self.edited_in_session.insert(record);
            assert!(first_edition, "record {record:?} edited twice during one writer session");
        }

        self.edited_record_backup
            .copy_from_slice(self.records.get(record));
        self.edition = Some(record);
    }

    /// Ends the edition of `record` and reports indexed field changes.
    ///
    /// Indices whose fields changed are notified, except `requester`, which
    /// handles its own changes.
    ///
    /// # Returns
    /// `true` if fields indexed by `requester` changed.
    pub(crate) fn end_record_edition(&mut self, record: RecordId, requester: Option<IndexId>) -> bool {
        assert_eq!(self.edition.take(), Some(record), "record is not under edition");

        let current = self.records.get(record);
        let backup = &self.edited_record_backup;
        let mut changed: IndexedFieldMask = 0;
        for (bit, indexed) in self.indexed_fields.iter().enumerate() {
            let field = &indexed.field;
            if !field.values_equal(field.value(current), field.value(backup)) {
                changed |= 1 << bit;
            }
        }

        if changed == 0 {
            return false;
        }

        let records = &self.records;
        let hash = notify_changed(&mut self.indices.hash, changed, record, requester, backup, records);
        let ordered = notify_changed(&mut self.indices.ordered, changed, record, requester, backup, records);
        let volumetric =
            notify_changed(&mut self.indices.volumetric, changed, record, requester, backup, records);
        hash || ordered || volumetric
    }

    /// Removes `record` from every index except `requester` and releases its slot.
    ///
    /// The record must be under edition: indices locate it by the backup.
    pub(crate) fn delete_record(&mut self, record: RecordId, requester: Option<IndexId>) {
        assert_eq!(self.edition.take(), Some(record), "record is not under edition");

        let records = &self.records;
        let backup = &self.edited_record_backup;
        notify_deleted(&mut self.indices.hash, record, requester, backup, records);
        notify_deleted(&mut self.indices.ordered, record, requester, backup, records);
        notify_deleted(&mut self.indices.volumetric, record, requester, backup, records);
        self.records.release(record);
    }

    fn assert_no_access(&self) {
        assert_eq!(self.access.writers, 0, "indices can not change while a writer is open");
        assert_eq!(self.active_readers(), 0, "indices can not change while readers are open");
    }

    fn allocate_index_id(&mut self) -> IndexId {
        let id = IndexId(self.next_index_id);
        self.next_index_id += 1;
        id
    }

    /// Order in which a new index receives existing records.
    fn fill_order(&self) -> Vec<RecordId> {
        // Ordered indices are contiguous, walking them is cheaper than scanning the arena.
        match self.indices.ordered.first() {
            Some(holder) => holder.index.records().to_vec(),
            None => self.records.iter().collect(),
        }
    }

    fn register_indexed_field_usages(&mut self, fields: &[FieldId]) -> Result<IndexedFieldMask, StoreError> {
        let mut missing: Vec<FieldId> = fields
            .iter()
            .copied()
            .filter(|id| !self.indexed_fields.iter().any(|indexed| indexed.id == *id))
            .collect();
        missing.sort_unstable();
        missing.dedup();

        if self.indexed_fields.len() + missing.len() > MAX_INDEXED_FIELDS {
            return Err(StoreError::TooManyIndexedFields {
                limit: MAX_INDEXED_FIELDS,
            });
        }

        for id in fields {
            match self.indexed_fields.iter_mut().find(|indexed| indexed.id == *id) {
                Some(indexed) => indexed.usages += 1,
                None => {
                    let field = self.mapping.resolve(*id)?.clone();
                    self.indexed_fields.push(IndexedField {
                        id: *id,
                        field,
                        usages: 1,
                    });
                }
            }
        }

        Ok(build_index_mask(&self.indexed_fields, fields))
    }

    fn unregister_indexed_field_usages(&mut self, fields: &[FieldId]) {
        for id in fields {
            let position = self
                .indexed_fields
                .iter()
                .position(|indexed| indexed.id == *id)
                .unwrap_or_else(|| panic!("field {id:?} is not indexed"));

            let indexed = &mut self.indexed_fields[position];
            indexed.usages -= 1;
            if indexed.usages == 0 {
                self.indexed_fields.swap_remove(position);
            }
        }

        self.rebuild_index_masks();
    }

    fn rebuild_index_masks(&mut self) {
        let indexed_fields = &self.indexed_fields;
        for holder in &mut self.indices.hash {
            holder.mask = build_index_mask(indexed_fields, holder.index.indexed_fields());
        }
        for holder in &mut self.indices.ordered {
            holder.mask = build_index_mask(indexed_fields, holder.index.indexed_fields());
        }
        for holder in &mut self.indices.volumetric {
            holder.mask = build_index_mask(indexed_fields, holder.index.indexed_fields());
        }
    }
}

fn check_index_capacity(count: usize, kind: &'static str) -> Result<(), StoreError> {
    if count >= MAX_INDICES_OF_SAME_KIND {
        return Err(StoreError::TooManyIndices {
            kind,
            limit: MAX_INDICES_OF_SAME_KIND,
        });
    }
    Ok(())
}

fn build_index_mask(indexed_fields: &[IndexedField], fields: &[FieldId]) -> IndexedFieldMask {
    fields.iter().fold(0, |mask, id| {
        match indexed_fields.iter().position(|indexed| indexed.id == *id) {
            Some(bit) => mask | (1 << bit),
            None => mask,
        }
    })
}

pub(crate) fn slot_of<I: IndexBase>(holders: &[IndexHolder<I>], id: IndexId) -> usize {
    holders
        .iter()
        .position(|holder| holder.index.id() == id)
        .unwrap_or_else(|| panic!("index {id:?} does not belong to this storage"))
}

fn notify_changed<I: IndexBase>(
    holders: &mut [IndexHolder<I>],
    changed: IndexedFieldMask,
    record: RecordId,
    requester: Option<IndexId>,
    backup: &[u8],
    records: &RecordArena,
) -> bool {
    let mut requester_changed = false;
    for holder in holders.iter_mut().filter(|holder| holder.mask & changed != 0) {
        if Some(holder.index.id()) == requester {
            requester_changed = true;
        } else {
            holder.index.on_record_changed(record, backup, records);
        }
    }
    requester_changed
}

fn notify_deleted<I: IndexBase>(
    holders: &mut [IndexHolder<I>],
    record: RecordId,
    requester: Option<IndexId>,
    backup: &[u8],
    records: &RecordArena,
) {
    for holder in holders
        .iter_mut()
        .filter(|holder| Some(holder.index.id()) != requester)
    {
        holder.index.on_record_deleted(record, backup, records);
    }
}
