//! Record allocation with deferred index insertion.

use crate::arena::RecordId;

use super::Storage;

/// Writer that appends new records to a [`Storage`].
///
/// [`allocate`](RecordAllocator::allocate) hands out a record initialized
/// from the mapping's default record. The caller fills it in place and the
/// record enters every index when the next one is allocated or when the
/// allocator is dropped.
#[derive(Debug)]
pub struct RecordAllocator<'a> {
    storage: &'a mut Storage,
    pending: Option<RecordId>,
    bulk: bool,
    inserted: usize,
}

impl<'a> RecordAllocator<'a> {
    pub(crate) fn new(storage: &'a mut Storage, bulk: bool) -> Self {
        storage.register_writer();
        if bulk {
            for holder in &mut storage.indices.ordered {
                holder.index.begin_mass_insertion();
            }
        }

        Self {
            storage,
            pending: None,
            bulk,
            inserted: 0,
        }
    }

    /// Allocates the next record and returns its bytes for initialization.
    pub fn allocate(&mut self) -> &mut [u8] {
        self.insert_pending();
        let record = self.storage.allocate_record();
        self.pending = Some(record);
        self.storage.records.get_mut(record)
    }

    fn insert_pending(&mut self) {
        if let Some(record) = self.pending.take() {
            self.storage.insert_record(record);
            self.inserted += 1;
        }
    }
}

impl Drop for RecordAllocator<'_> {
    fn drop(&mut self) {
        self.insert_pending();

        if self.bulk {
            let storage = &mut *self.storage;
            let records = &storage.records;
            for holder in &mut storage.indices.ordered {
                holder.index.finish_mass_insertion(records);
            }
            tracing::debug!(
                "Bulk insertion of {} records sorted {} ordered indices",
                self.inserted,
                storage.indices.ordered.len()
            );
        } else {
            tracing::trace!("Inserted {} records", self.inserted);
        }

        self.storage.unregister_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBase;
    use crate::mapping::{FieldArchetype, RecordMapping};
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_records_start_from_default_record() {
        let mut builder = RecordMapping::builder();
        let value = builder.add_field("value", FieldArchetype::UInt, 0, 2);
        builder.default_value(value, &42u16.to_ne_bytes());
        let mut storage = Storage::new(builder.build().unwrap());

        {
            let mut allocator = storage.allocate_and_insert();
            assert_eq!(allocator.allocate(), &42u16.to_ne_bytes());
            allocator.allocate().copy_from_slice(&7u16.to_ne_bytes());
        }

        assert_eq!(storage.record_count(), 2);
        let values: Vec<&[u8]> = storage
            .records
            .iter()
            .map(|record| storage.records.get(record))
            .collect();
        assert_eq!(values, vec![&42u16.to_ne_bytes()[..], &7u16.to_ne_bytes()[..]]);
    }

    #[timeout(1000)]
    #[test]
    fn test_bulk_allocator_sorts_ordered_indices_on_drop() {
        let mut builder = RecordMapping::builder();
        let value = builder.add_field("value", FieldArchetype::UInt, 0, 4);
        let mut storage = Storage::new(builder.build().unwrap());
        let ordered = storage.create_ordered_index(value).unwrap();

        {
            let mut allocator = storage.allocate_and_insert_in_bulk();
            for key in [9u32, 4, 6] {
                allocator.allocate().copy_from_slice(&key.to_ne_bytes());
            }
            assert!(!allocator.storage.indices.ordered[0].index.can_be_dropped());
        }

        let keys: Vec<u32> = storage
            .ordered(ordered)
            .lookup_to_read_ascending(None, None)
            .map(|record| u32::from_ne_bytes(record.try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![4, 6, 9]);
        assert!(storage.ordered(ordered).can_be_dropped());
    }
}
