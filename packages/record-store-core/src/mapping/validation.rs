//! Validation methods for record mappings.

use std::collections::HashSet;

use super::field::{Field, FieldArchetype};
use crate::error::StoreError;

/// Validates that every field size is legal for its archetype.
///
/// # Arguments
/// * `fields` - Field definitions to validate
///
/// # Returns
/// `Result<(), StoreError>` indicating success or validation failure.
pub(crate) fn validate_field_sizes(fields: &[Field]) -> Result<(), StoreError> {
    for field in fields {
        let bit_in_range = field.archetype != FieldArchetype::Bit || field.bit_offset < 8;
        if !field.archetype.accepts_size(field.size) || !bit_in_range {
            return Err(StoreError::InvalidFieldSize {
                field: field.name.clone(),
                archetype: field.archetype,
                size: field.size,
            });
        }
    }
    Ok(())
}

/// Validates that field names are unique.
pub(crate) fn validate_field_names(fields: &[Field]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(StoreError::DuplicateField {
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

/// Validates that all fields fit within the record size.
///
/// # Arguments
/// * `fields` - Field definitions to validate
/// * `record_size` - Record size in bytes
///
/// # Returns
/// `Result<(), StoreError>` indicating success or validation failure.
pub(crate) fn validate_record_size(fields: &[Field], record_size: usize) -> Result<(), StoreError> {
    for field in fields {
        let field_end = field
            .offset
            .checked_add(field.size)
            .ok_or(StoreError::CapacityOverflow {
                operation: "field bounds calculation",
            })?;

        if field_end > record_size {
            return Err(StoreError::FieldExceedsRecordSize {
                field: field.name.clone(),
                offset: field.offset,
                size: field.size,
                record_size,
            });
        }
    }
    Ok(())
}

/// Validates that no two fields overlap.
///
/// Bit fields may share a byte as long as they use different bits.
pub(crate) fn validate_field_layout(fields: &[Field]) -> Result<(), StoreError> {
    let mut ordered: Vec<&Field> = fields.iter().collect();
    ordered.sort_by_key(|field| field.offset);

    for (position, first) in ordered.iter().enumerate() {
        for second in &ordered[position + 1..] {
            if second.offset >= first.end_offset() {
                break;
            }

            let shared_byte = first.archetype == FieldArchetype::Bit
                && second.archetype == FieldArchetype::Bit
                && first.bit_offset != second.bit_offset;

            if !shared_byte {
                return Err(StoreError::OverlappingFields {
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Calculates record size from field definitions.
///
/// Record size is the maximum of (field offset + field size) across all fields.
///
/// # Arguments
/// * `fields` - Field definitions
///
/// # Returns
/// `Result<usize, StoreError>` containing the calculated record size.
pub(crate) fn calculate_record_size(fields: &[Field]) -> Result<usize, StoreError> {
    let mut max_end = 0;

    for field in fields {
        let field_end = field
            .offset
            .checked_add(field.size)
            .ok_or(StoreError::CapacityOverflow {
                operation: "record size calculation",
            })?;

        max_end = max_end.max(field_end);
    }

    Ok(max_end)
}
