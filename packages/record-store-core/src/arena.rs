//! Stable-address record arena.
//!
//! Records live in fixed-size chunks that are never reallocated, so a slot
//! keeps its address for as long as it is occupied. Indices refer to records
//! through [`RecordId`] slots; only the arena releases them.

/// Slot of a live record inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) u32);

impl RecordId {
    /// Returns the raw slot number.
    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Chunked block allocator sized for one record type.
#[derive(Debug)]
pub struct RecordArena {
    record_size: usize,
    records_per_chunk: usize,
    chunks: Vec<Box<[u8]>>,
    occupied: Vec<bool>,
    free_slots: Vec<RecordId>,
    live: usize,
}

impl RecordArena {
    /// Creates an empty arena.
    ///
    /// # Arguments
    /// * `record_size` - Size of every record in bytes
    /// * `records_per_chunk` - Slots allocated at once when the arena grows
    pub fn new(record_size: usize, records_per_chunk: usize) -> Self {
        assert!(record_size > 0, "records must not be zero-sized");
        Self {
            record_size,
            records_per_chunk: records_per_chunk.max(1),
            chunks: Vec::new(),
            occupied: Vec::new(),
            free_slots: Vec::new(),
            live: 0,
        }
    }

    /// Reserves a slot and initializes it with `initial`.
    pub fn acquire(&mut self, initial: &[u8]) -> RecordId {
        debug_assert_eq!(initial.len(), self.record_size);
        let id = match self.free_slots.pop() {
            Some(id) => id,
            None => {
                let slot = self.occupied.len();
                if slot == self.chunks.len() * self.records_per_chunk {
                    self.chunks
                        .push(vec![0u8; self.record_size * self.records_per_chunk].into_boxed_slice());
                }
                self.occupied.push(false);
                RecordId(u32::try_from(slot).unwrap_or_else(|_| panic!("record arena exhausted")))
            }
        };

        self.occupied[id.slot()] = true;
        self.live += 1;
        self.get_mut(id).copy_from_slice(initial);
        id
    }

    /// Returns a slot to the free list.
    pub fn release(&mut self, id: RecordId) {
        assert!(self.is_live(id), "record {id:?} released twice");
        self.occupied[id.slot()] = false;
        self.free_slots.push(id);
        self.live -= 1;
    }

    /// Returns the bytes of a live record.
    pub fn get(&self, id: RecordId) -> &[u8] {
        debug_assert!(self.is_live(id), "record {id:?} is not live");
        let (chunk, start) = self.locate(id);
        &self.chunks[chunk][start..start + self.record_size]
    }

    /// Returns the bytes of a live record for writing.
    pub fn get_mut(&mut self, id: RecordId) -> &mut [u8] {
        debug_assert!(self.is_live(id), "record {id:?} is not live");
        let (chunk, start) = self.locate(id);
        &mut self.chunks[chunk][start..start + self.record_size]
    }

    /// Returns whether `id` currently holds a record.
    pub fn is_live(&self, id: RecordId) -> bool {
        self.occupied.get(id.slot()).copied().unwrap_or(false)
    }

    /// Iterates over live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .map(|(slot, _)| RecordId(slot as u32))
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no record is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the number of slots ever handed out, live or free.
    ///
    /// Every [`RecordId`] produced so far is below this bound.
    pub fn slot_count(&self) -> usize {
        self.occupied.len()
    }

    /// Returns the record size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn locate(&self, id: RecordId) -> (usize, usize) {
        let slot = id.slot();
        (
            slot / self.records_per_chunk,
            (slot % self.records_per_chunk) * self.record_size,
        )
    }
}
