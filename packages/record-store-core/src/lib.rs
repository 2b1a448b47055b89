//! In-process multi-index record store.
//!
//! Keeps fixed-layout records in a stable-address arena and maintains hash,
//! ordered and volumetric indices over them. Records are only reached through
//! index cursors: read cursors may be shared, edit cursors are exclusive and
//! drive change detection and re-indexing through the storage.

pub mod arena;
pub mod config;
pub mod error;
pub mod index;
pub mod mapping;
pub mod storage;

pub use arena::RecordId;
pub use config::StoreConfig;
pub use error::StoreError;
pub use index::hash::{HashEditCursor, HashIndexMut, HashIndexRef, HashReadCursor};
pub use index::ordered::{OrderedEditCursor, OrderedIndexMut, OrderedIndexRef, OrderedReadCursor};
pub use index::volumetric::{
    encode_ray, encode_shape, AxisValue, DimensionDescriptor, VolumetricEditCursor,
    VolumetricIndexMut, VolumetricIndexRef, VolumetricReadCursor,
};
pub use index::{Bound, HashIndexHandle, IndexId, OrderedIndexHandle, VolumetricIndexHandle};
pub use mapping::{Field, FieldArchetype, FieldId, RecordMapping, RecordMappingBuilder};
pub use storage::{RecordAllocator, Storage};
