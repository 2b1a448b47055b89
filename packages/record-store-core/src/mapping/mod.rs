//! Record layout description: fields, offsets and the default record.

pub mod field;
mod validation;

pub use field::{Field, FieldArchetype, FieldId};

use crate::error::StoreError;
use validation::{
    calculate_record_size, validate_field_layout, validate_field_names, validate_field_sizes,
    validate_record_size,
};

/// Validated layout of one record type.
///
/// Records stored by a [`Storage`](crate::Storage) are plain byte blocks of
/// [`object_size`](RecordMapping::object_size) bytes whose fields are
/// described here.
#[derive(Debug, Clone)]
pub struct RecordMapping {
    fields: Vec<Field>,
    object_size: usize,
    default_record: Box<[u8]>,
}

impl RecordMapping {
    /// Starts describing a new record layout.
    pub fn builder() -> RecordMappingBuilder {
        RecordMappingBuilder::default()
    }

    /// Returns the record size in bytes.
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Returns the field registered under `id`, if any.
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id.0)
    }

    /// Looks up a field id by name.
    pub fn find(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .map(FieldId)
    }

    /// Iterates over all fields in registration order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(position, field)| (FieldId(position), field))
    }

    /// Returns the bytes every freshly allocated record starts from.
    pub fn default_record(&self) -> &[u8] {
        &self.default_record
    }

    pub(crate) fn resolve(&self, id: FieldId) -> Result<&Field, StoreError> {
        self.fields
            .get(id.0)
            .ok_or(StoreError::UnknownField { id: id.0 })
    }
}

/// Incremental builder for [`RecordMapping`].
#[derive(Debug, Default)]
pub struct RecordMappingBuilder {
    fields: Vec<Field>,
    object_size: Option<usize>,
    defaults: Vec<(FieldId, Vec<u8>)>,
}

impl RecordMappingBuilder {
    /// Registers a byte-addressed field.
    ///
    /// # Arguments
    /// * `name` - Unique field name
    /// * `archetype` - Value archetype
    /// * `offset` - Byte offset within record
    /// * `size` - Field size in bytes
    ///
    /// # Returns
    /// Id of the new field, valid once the mapping is built.
    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        archetype: FieldArchetype,
        offset: usize,
        size: usize,
    ) -> FieldId {
        self.fields
            .push(Field::new(name.into(), archetype, offset, size));
        FieldId(self.fields.len() - 1)
    }

    /// Registers a bit field stored in bit `bit_offset` of the byte at `offset`.
    pub fn add_bit_field(&mut self, name: impl Into<String>, offset: usize, bit_offset: u8) -> FieldId {
        self.fields.push(Field::bit(name.into(), offset, bit_offset));
        FieldId(self.fields.len() - 1)
    }

    /// Pads records up to `size` bytes instead of ending at the last field.
    pub fn object_size(&mut self, size: usize) -> &mut Self {
        self.object_size = Some(size);
        self
    }

    /// Sets the value `field` takes in freshly allocated records.
    ///
    /// Bit fields take a single byte: any non-zero value sets the bit.
    pub fn default_value(&mut self, field: FieldId, value: &[u8]) -> &mut Self {
        self.defaults.push((field, value.to_vec()));
        self
    }

    /// Validates the layout and builds the mapping.
    ///
    /// # Returns
    /// `Result<RecordMapping, StoreError>` with the validated mapping.
    pub fn build(self) -> Result<RecordMapping, StoreError> {
        validate_field_sizes(&self.fields)?;
        validate_field_names(&self.fields)?;

        let object_size = match self.object_size {
            Some(size) => size,
            None => calculate_record_size(&self.fields)?,
        };
        if object_size == 0 {
            return Err(StoreError::EmptyRecord);
        }

        validate_record_size(&self.fields, object_size)?;
        validate_field_layout(&self.fields)?;

        let mut default_record = vec![0u8; object_size].into_boxed_slice();
        for (id, value) in &self.defaults {
            let field = self
                .fields
                .get(id.0)
                .ok_or(StoreError::UnknownField { id: id.0 })?;

            if value.len() != field.size {
                return Err(StoreError::DefaultValueSize {
                    field: field.name.clone(),
                    expected: field.size,
                    got: value.len(),
                });
            }

            match field.archetype {
                FieldArchetype::Bit => field.set_bit(&mut default_record, value[0] != 0),
                _ => field.value_mut(&mut default_record).copy_from_slice(value),
            }
        }

        Ok(RecordMapping {
            fields: self.fields,
            object_size,
            default_record,
        })
    }
}
