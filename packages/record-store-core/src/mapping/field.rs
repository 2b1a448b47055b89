//! Field definition within a record mapping.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Kind of value stored by a field, driving comparison and key normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldArchetype {
    /// Single bit inside a byte
    Bit,
    /// Signed integer of 1, 2, 4 or 8 bytes
    Int,
    /// Unsigned integer of 1, 2, 4 or 8 bytes
    UInt,
    /// IEEE float of 4 or 8 bytes
    Float,
    /// Fixed-capacity NUL-terminated UTF-8 string
    String,
    /// Opaque byte block
    Block,
}

impl FieldArchetype {
    /// Returns `true` if values of this archetype can be converted to `f64`.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::UInt | Self::Float)
    }

    /// Returns `true` if `size` is a legal field size for this archetype.
    pub fn accepts_size(self, size: usize) -> bool {
        match self {
            Self::Bit => size == 1,
            Self::Int | Self::UInt => matches!(size, 1 | 2 | 4 | 8),
            Self::Float => matches!(size, 4 | 8),
            Self::String | Self::Block => size > 0,
        }
    }
}

/// Position of a field inside its [`RecordMapping`](super::RecordMapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    /// Returns the raw position of this field in the mapping.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Field definition within a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Value archetype
    pub archetype: FieldArchetype,
    /// Byte offset within record
    pub offset: usize,
    /// Field size in bytes
    pub size: usize,
    /// Bit position inside the byte at `offset` (bit fields only)
    pub bit_offset: u8,
}

impl Field {
    /// Creates a new byte-addressed field.
    ///
    /// # Arguments
    /// * `name` - Field name
    /// * `archetype` - Value archetype
    /// * `offset` - Byte offset within record
    /// * `size` - Field size in bytes
    ///
    /// # Returns
    /// A new Field instance.
    pub fn new(name: String, archetype: FieldArchetype, offset: usize, size: usize) -> Self {
        Self {
            name,
            archetype,
            offset,
            size,
            bit_offset: 0,
        }
    }

    /// Creates a new bit field occupying one bit of the byte at `offset`.
    pub fn bit(name: String, offset: usize, bit_offset: u8) -> Self {
        Self {
            name,
            archetype: FieldArchetype::Bit,
            offset,
            size: 1,
            bit_offset,
        }
    }

    /// Returns the end offset of this field (offset + size).
    pub fn end_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Returns the mask selecting this field's bit. Zero for non-bit fields.
    pub fn bit_mask(&self) -> u8 {
        match self.archetype {
            FieldArchetype::Bit => 1u8 << self.bit_offset,
            _ => 0,
        }
    }

    /// Returns this field's bytes inside `record`.
    pub fn value<'r>(&self, record: &'r [u8]) -> &'r [u8] {
        &record[self.offset..self.end_offset()]
    }

    /// Returns this field's bytes inside `record` for writing.
    pub fn value_mut<'r>(&self, record: &'r mut [u8]) -> &'r mut [u8] {
        &mut record[self.offset..self.end_offset()]
    }

    /// Returns whether this bit field is set in `record`.
    pub fn is_bit_set(&self, record: &[u8]) -> bool {
        debug_assert_eq!(self.archetype, FieldArchetype::Bit);
        record[self.offset] & self.bit_mask() != 0
    }

    /// Sets or clears this bit field in `record`, leaving neighbouring bits intact.
    pub fn set_bit(&self, record: &mut [u8], value: bool) {
        debug_assert_eq!(self.archetype, FieldArchetype::Bit);
        if value {
            record[self.offset] |= self.bit_mask();
        } else {
            record[self.offset] &= !self.bit_mask();
        }
    }

    /// Returns whether two values of this field are equal.
    ///
    /// Bit fields only compare their own bit and strings stop at the first NUL.
    pub fn values_equal(&self, left: &[u8], right: &[u8]) -> bool {
        match self.archetype {
            FieldArchetype::Bit => (left[0] ^ right[0]) & self.bit_mask() == 0,
            FieldArchetype::String => trim_nul(left) == trim_nul(right),
            _ => left == right,
        }
    }

    /// Compares two values of this field.
    ///
    /// Integers compare numerically, floats use IEEE total ordering, strings
    /// compare up to the first NUL and blocks compare bytewise.
    pub fn compare_values(&self, left: &[u8], right: &[u8]) -> Ordering {
        match self.archetype {
            FieldArchetype::Bit => {
                let mask = self.bit_mask();
                (left[0] & mask).cmp(&(right[0] & mask))
            }
            FieldArchetype::Int => read_int(left).cmp(&read_int(right)),
            FieldArchetype::UInt => read_uint(left).cmp(&read_uint(right)),
            FieldArchetype::Float => match self.size {
                4 => f32::from_ne_bytes(array(left)).total_cmp(&f32::from_ne_bytes(array(right))),
                _ => f64::from_ne_bytes(array(left)).total_cmp(&f64::from_ne_bytes(array(right))),
            },
            FieldArchetype::String => trim_nul(left).cmp(trim_nul(right)),
            FieldArchetype::Block => left.cmp(right),
        }
    }

    /// Compares two numeric values of this field by their numeric value.
    ///
    /// Unlike [`Field::compare_values`], `-0.0` and `0.0` are equal and a NaN
    /// compares to nothing.
    pub fn compare_numeric(&self, left: &[u8], right: &[u8]) -> Option<Ordering> {
        match self.archetype {
            FieldArchetype::Float => self.to_f64(left).partial_cmp(&self.to_f64(right)),
            _ => Some(self.compare_values(left, right)),
        }
    }

    /// Appends the normalized hash key of `value` to `output`.
    ///
    /// Equal values according to [`Field::values_equal`] produce equal keys.
    pub fn append_key(&self, value: &[u8], output: &mut Vec<u8>) {
        match self.archetype {
            FieldArchetype::Bit => output.push(u8::from(value[0] & self.bit_mask() != 0)),
            FieldArchetype::String => {
                output.extend_from_slice(trim_nul(value));
                // Terminator keeps composite keys unambiguous.
                output.push(0);
            }
            _ => output.extend_from_slice(value),
        }
    }

    /// Converts a numeric value of this field to `f64`.
    ///
    /// # Panics
    /// Panics if the field archetype is not numeric.
    pub fn to_f64(&self, value: &[u8]) -> f64 {
        match self.archetype {
            FieldArchetype::Int => read_int(value) as f64,
            FieldArchetype::UInt => read_uint(value) as f64,
            FieldArchetype::Float => match self.size {
                4 => f64::from(f32::from_ne_bytes(array(value))),
                _ => f64::from_ne_bytes(array(value)),
            },
            archetype => panic!("field '{}' of archetype {archetype:?} is not numeric", self.name),
        }
    }
}

fn trim_nul(value: &[u8]) -> &[u8] {
    match value.iter().position(|&byte| byte == 0) {
        Some(end) => &value[..end],
        None => value,
    }
}

fn array<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&value[..N]);
    bytes
}

fn read_int(value: &[u8]) -> i64 {
    match value.len() {
        1 => i64::from(i8::from_ne_bytes(array(value))),
        2 => i64::from(i16::from_ne_bytes(array(value))),
        4 => i64::from(i32::from_ne_bytes(array(value))),
        _ => i64::from_ne_bytes(array(value)),
    }
}

fn read_uint(value: &[u8]) -> u64 {
    match value.len() {
        1 => u64::from(value[0]),
        2 => u64::from(u16::from_ne_bytes(array(value))),
        4 => u64::from(u32::from_ne_bytes(array(value))),
        _ => u64::from_ne_bytes(array(value)),
    }
}
