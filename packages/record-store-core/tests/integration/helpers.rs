//! Shared record layouts for the integration tests.

use anyhow::Result;

use record_store_core::{
    DimensionDescriptor, FieldArchetype, HashIndexHandle, OrderedIndexHandle, RecordMapping, Storage,
    StoreConfig, VolumetricIndexHandle,
};

pub const NAME_SIZE: usize = 12;

/// Person record: `name: [u8; 12] @0`, `age: i32 @12`, bounds `x_min, x_max, y_min, y_max: f32 @16..32`.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i32,
    pub bounds: [f32; 4],
}

impl Person {
    pub fn new(name: &str, age: i32, bounds: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            age,
            bounds,
        }
    }

    pub fn write(&self, record: &mut [u8]) {
        record[..NAME_SIZE].copy_from_slice(&name_request(&self.name));
        record[12..16].copy_from_slice(&self.age.to_ne_bytes());
        for (position, value) in self.bounds.iter().enumerate() {
            let offset = 16 + position * 4;
            record[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
        }
    }

    pub fn read(record: &[u8]) -> Self {
        let end = record[..NAME_SIZE]
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(NAME_SIZE);
        let mut bounds = [0.0; 4];
        for (position, value) in bounds.iter_mut().enumerate() {
            let offset = 16 + position * 4;
            *value = f32::from_ne_bytes(record[offset..offset + 4].try_into().unwrap());
        }
        Self {
            name: String::from_utf8_lossy(&record[..end]).into_owned(),
            age: i32::from_ne_bytes(record[12..16].try_into().unwrap()),
            bounds,
        }
    }
}

/// Encodes a name as a hash lookup request.
pub fn name_request(name: &str) -> [u8; NAME_SIZE] {
    let mut request = [0u8; NAME_SIZE];
    request[..name.len()].copy_from_slice(name.as_bytes());
    request
}

/// Storage of people with a hash index by name, an ordered index by age and
/// a volumetric index over the bounds.
pub struct People {
    pub storage: Storage,
    pub by_name: HashIndexHandle,
    pub by_age: OrderedIndexHandle,
    pub space: VolumetricIndexHandle,
}

pub fn create_people(people: &[Person]) -> Result<People> {
    create_people_with_config(people, StoreConfig::default())
}

pub fn create_people_with_config(people: &[Person], config: StoreConfig) -> Result<People> {
    let mut builder = RecordMapping::builder();
    let name = builder.add_field("name", FieldArchetype::String, 0, NAME_SIZE);
    let age = builder.add_field("age", FieldArchetype::Int, 12, 4);
    let x_min = builder.add_field("x_min", FieldArchetype::Float, 16, 4);
    let x_max = builder.add_field("x_max", FieldArchetype::Float, 20, 4);
    let y_min = builder.add_field("y_min", FieldArchetype::Float, 24, 4);
    let y_max = builder.add_field("y_max", FieldArchetype::Float, 28, 4);
    let mut storage = Storage::with_config(builder.build()?, config);

    {
        let mut allocator = storage.allocate_and_insert();
        for person in people {
            person.write(allocator.allocate());
        }
    }

    let by_name = storage.create_hash_index(&[name])?;
    let by_age = storage.create_ordered_index(age)?;
    let space = storage.create_volumetric_index(&[
        DimensionDescriptor {
            min_field: x_min,
            global_min_border: -100.0,
            max_field: x_max,
            global_max_border: 100.0,
        },
        DimensionDescriptor {
            min_field: y_min,
            global_min_border: -100.0,
            max_field: y_max,
            global_max_border: 100.0,
        },
    ])?;

    Ok(People {
        storage,
        by_name,
        by_age,
        space,
    })
}

/// Storage of `(key: i32 @0, tag: u32 @4)` records with a hash and an ordered index on the key.
pub struct Keyed {
    pub storage: Storage,
    pub by_key_hash: HashIndexHandle,
    pub by_key: OrderedIndexHandle,
}

pub fn create_keyed(keys: &[i32], bulk: bool) -> Result<Keyed> {
    let mut builder = RecordMapping::builder();
    let key = builder.add_field("key", FieldArchetype::Int, 0, 4);
    builder.add_field("tag", FieldArchetype::UInt, 4, 4);
    let mut storage = Storage::new(builder.build()?);

    let by_key_hash = storage.create_hash_index(&[key])?;
    let by_key = storage.create_ordered_index(key)?;
    {
        let mut allocator = if bulk {
            storage.allocate_and_insert_in_bulk()
        } else {
            storage.allocate_and_insert()
        };
        for (tag, key) in keys.iter().enumerate() {
            let record = allocator.allocate();
            record[0..4].copy_from_slice(&key.to_ne_bytes());
            record[4..8].copy_from_slice(&(tag as u32).to_ne_bytes());
        }
    }

    Ok(Keyed {
        storage,
        by_key_hash,
        by_key,
    })
}

pub fn key_of(record: &[u8]) -> i32 {
    i32::from_ne_bytes(record[0..4].try_into().unwrap())
}

pub fn tag_of(record: &[u8]) -> u32 {
    u32::from_ne_bytes(record[4..8].try_into().unwrap())
}

/// Keys of a keyed storage in ascending order.
pub fn ascending_keys(keyed: &Keyed) -> Vec<i32> {
    keyed
        .storage
        .ordered(keyed.by_key)
        .lookup_to_read_ascending(None, None)
        .map(key_of)
        .collect()
}
