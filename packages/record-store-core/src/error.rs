//! Record store error types.

use thiserror::Error;

use crate::mapping::FieldArchetype;

/// Errors raised while building a record mapping or creating an index.
///
/// Contract violations (two writers, re-entrant editions, dropping a busy
/// index) are assertion failures and never surface here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Field name registered twice
    #[error("Field '{field}' already exists in mapping")]
    DuplicateField { field: String },

    /// Field exceeds record size boundaries
    #[error("Field '{field}' (offset={offset}, size={size}) exceeds record size {record_size}")]
    FieldExceedsRecordSize {
        field: String,
        offset: usize,
        size: usize,
        record_size: usize,
    },

    /// Two fields share bytes of the record
    #[error("Fields '{first}' and '{second}' overlap")]
    OverlappingFields { first: String, second: String },

    /// Field size is not legal for its archetype
    #[error("Field '{field}' has invalid size {size} for archetype {archetype:?}")]
    InvalidFieldSize {
        field: String,
        archetype: FieldArchetype,
        size: usize,
    },

    /// Default value does not match the field size
    #[error("Default value for field '{field}' has {got} bytes, expected {expected}")]
    DefaultValueSize {
        field: String,
        expected: usize,
        got: usize,
    },

    /// Mapping describes a zero-sized record
    #[error("Record mapping describes an empty record")]
    EmptyRecord,

    /// Capacity calculation overflow
    #[error("Capacity overflow during {operation}")]
    CapacityOverflow { operation: &'static str },

    /// Field id does not belong to the mapping
    #[error("Unknown field id {id}")]
    UnknownField { id: usize },

    /// Index created without key fields
    #[error("Index key must reference at least one field")]
    EmptyIndexKey,

    /// Indexed field tracking capacity exhausted
    #[error("Too many indexed fields (limit {limit})")]
    TooManyIndexedFields { limit: usize },

    /// Too many indices of one kind
    #[error("Too many {kind} indices (limit {limit})")]
    TooManyIndices { kind: &'static str, limit: usize },

    /// Volumetric index dimension count out of range
    #[error("Volumetric index supports 1 to {max} dimensions, got {got}")]
    InvalidDimensionCount { max: usize, got: usize },

    /// Field archetype cannot describe a volumetric axis
    #[error("Field '{field}' with archetype {archetype:?} cannot be used as a volumetric axis")]
    UnsupportedAxisField {
        field: String,
        archetype: FieldArchetype,
    },

    /// Volumetric axis fields disagree on archetype or size
    #[error("Volumetric axis field '{field}' does not match archetype and size of '{expected}'")]
    MismatchedAxisField { field: String, expected: String },

    /// Global borders of a volumetric dimension are inverted or empty
    #[error("Dimension {dimension} has invalid borders: min {min} must be below max {max}")]
    InvalidBorders { dimension: usize, min: f64, max: f64 },
}
