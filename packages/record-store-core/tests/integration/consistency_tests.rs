//! Randomized consistency checks, shared readers and configuration.

use std::collections::{HashMap, HashSet};
use std::thread;

use ntest::timeout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use record_store_core::{encode_shape, StoreConfig};

use super::helpers::{
    ascending_keys, create_keyed, create_people, create_people_with_config, key_of, name_request, tag_of, Keyed,
    People, Person,
};

/// Live keys by tag, read through the ordered index.
fn keys_by_tag(keyed: &Keyed) -> HashMap<u32, i32> {
    keyed
        .storage
        .ordered(keyed.by_key)
        .lookup_to_read_ascending(None, None)
        .map(|record| (tag_of(record), key_of(record)))
        .collect()
}

fn assert_consistent(keyed: &Keyed, expected: &HashMap<u32, i32>) {
    let keys = ascending_keys(keyed);
    assert_eq!(keys.len(), keyed.storage.record_count());
    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(&keys_by_tag(keyed), expected);

    let hash = keyed.storage.hash(keyed.by_key_hash);
    for (tag, key) in expected {
        let found = hash
            .lookup_to_read(&key.to_ne_bytes())
            .filter(|record| tag_of(record) == *tag)
            .count();
        assert_eq!(found, 1, "tag {tag} with key {key}");
    }
}

#[timeout(5000)]
#[test]
fn test_bulk_and_individual_insertion_are_equivalent() {
    let mut rng = StdRng::seed_from_u64(7);
    let keys: Vec<i32> = (0..2000).map(|_| rng.gen_range(-50..50)).collect();

    let individual = create_keyed(&keys, false).unwrap();
    let bulk = create_keyed(&keys, true).unwrap();

    let read = |keyed: &Keyed| -> Vec<(i32, u32)> {
        keyed
            .storage
            .ordered(keyed.by_key)
            .lookup_to_read_ascending(None, None)
            .map(|record| (key_of(record), tag_of(record)))
            .collect()
    };
    assert_eq!(read(&individual), read(&bulk));
}

#[timeout(5000)]
#[test]
fn test_random_edits_keep_indices_consistent() {
    let mut rng = StdRng::seed_from_u64(42);
    let keys: Vec<i32> = (0..500).map(|_| rng.gen_range(0..100)).collect();
    let mut keyed = create_keyed(&keys, true).unwrap();
    let mut expected: HashMap<u32, i32> = keys
        .iter()
        .enumerate()
        .map(|(tag, key)| (tag as u32, *key))
        .collect();

    for round in 0..20 {
        let low = rng.gen_range(0..100i32);
        let high = low + rng.gen_range(0..20);

        if round % 2 == 0 {
            let (low_bytes, high_bytes) = (low.to_ne_bytes(), high.to_ne_bytes());
            let mut cursor = keyed
                .storage
                .ordered_mut(keyed.by_key)
                .lookup_to_edit_ascending(Some(&low_bytes), Some(&high_bytes));
            while let Some(record) = cursor.current() {
                let tag = tag_of(record);
                match rng.gen_range(0..3) {
                    0 => {
                        cursor.delete_current();
                        expected.remove(&tag);
                    }
                    1 => {
                        let key = rng.gen_range(0..100i32);
                        record[0..4].copy_from_slice(&key.to_ne_bytes());
                        expected.insert(tag, key);
                        cursor.advance();
                    }
                    _ => cursor.advance(),
                }
            }
        } else {
            let mut cursor = keyed
                .storage
                .hash_mut(keyed.by_key_hash)
                .lookup_to_edit(&low.to_ne_bytes());
            while let Some(record) = cursor.current() {
                let tag = tag_of(record);
                if rng.gen_bool(0.3) {
                    cursor.delete_current();
                    expected.remove(&tag);
                } else {
                    let key = rng.gen_range(0..100i32);
                    record[0..4].copy_from_slice(&key.to_ne_bytes());
                    expected.insert(tag, key);
                    cursor.advance();
                }
            }
        }

        assert_consistent(&keyed, &expected);
    }
}

fn random_bounds(rng: &mut StdRng) -> [f32; 4] {
    let x = rng.gen_range(-100.0f32..95.0);
    let y = rng.gen_range(-100.0f32..95.0);
    [x, x + rng.gen_range(0.0..5.0), y, y + rng.gen_range(0.0..5.0)]
}

fn random_shape(rng: &mut StdRng) -> [(f32, f32); 2] {
    let x = rng.gen_range(-110.0f32..90.0);
    let y = rng.gen_range(-110.0f32..90.0);
    [(x, x + rng.gen_range(0.0..40.0)), (y, y + rng.gen_range(0.0..40.0))]
}

fn intersects(bounds: &[f32; 4], shape: &[(f32, f32); 2]) -> bool {
    shape[0].0 <= bounds[1] && shape[0].1 >= bounds[0] && shape[1].0 <= bounds[3] && shape[1].1 >= bounds[2]
}

/// Names of the expected people intersecting `shape`, sorted.
fn expected_inside(expected: &HashMap<String, Person>, shape: &[(f32, f32); 2]) -> Vec<String> {
    let mut names: Vec<String> = expected
        .values()
        .filter(|person| intersects(&person.bounds, shape))
        .map(|person| person.name.clone())
        .collect();
    names.sort();
    names
}

fn assert_people_consistent(people: &People, expected: &HashMap<String, Person>, rng: &mut StdRng) {
    let storage = &people.storage;
    assert_eq!(storage.record_count(), expected.len());

    let ages: Vec<i32> = storage
        .ordered(people.by_age)
        .lookup_to_read_ascending(None, None)
        .map(|record| Person::read(record).age)
        .collect();
    let mut expected_ages: Vec<i32> = expected.values().map(|person| person.age).collect();
    expected_ages.sort_unstable();
    assert_eq!(ages, expected_ages);

    for person in expected.values() {
        let found: Vec<Person> = storage
            .hash(people.by_name)
            .lookup_to_read(&name_request(&person.name))
            .map(Person::read)
            .collect();
        assert_eq!(found, vec![person.clone()]);
    }

    for _ in 0..10 {
        let shape = random_shape(rng);
        let mut inside: Vec<String> = storage
            .volumetric(people.space)
            .lookup_shape_intersection_to_read(&encode_shape(&shape))
            .map(|record| Person::read(record).name)
            .collect();
        inside.sort();
        assert_eq!(inside, expected_inside(expected, &shape), "shape {shape:?}");
    }
}

#[timeout(5000)]
#[test]
fn test_random_volumetric_edits_keep_indices_consistent() {
    let mut rng = StdRng::seed_from_u64(11);
    let initial: Vec<Person> = (0..300)
        .map(|position| Person::new(&format!("p{position}"), position, random_bounds(&mut rng)))
        .collect();
    let mut people = create_people(&initial).unwrap();
    let mut expected: HashMap<String, Person> = initial
        .into_iter()
        .map(|person| (person.name.clone(), person))
        .collect();

    for _ in 0..30 {
        let shape = random_shape(&mut rng);
        let matching = expected_inside(&expected, &shape);
        let mut seen = HashSet::new();
        {
            let mut cursor = people
                .storage
                .volumetric_mut(people.space)
                .lookup_shape_intersection_to_edit(&encode_shape(&shape));
            while let Some(record) = cursor.current() {
                let person = Person::read(record);
                assert_eq!(expected.get(&person.name), Some(&person));
                assert!(intersects(&person.bounds, &shape));
                assert!(seen.insert(person.name.clone()), "{} yielded twice", person.name);

                match rng.gen_range(0..4) {
                    0 => {
                        cursor.delete_current();
                        expected.remove(&person.name);
                    }
                    1 => {
                        let moved = Person::new(&person.name, person.age, random_bounds(&mut rng));
                        moved.write(record);
                        expected.insert(person.name, moved);
                        cursor.advance();
                    }
                    2 => {
                        let older = Person::new(&person.name, rng.gen_range(0..1000), person.bounds);
                        older.write(record);
                        expected.insert(person.name, older);
                        cursor.advance();
                    }
                    _ => cursor.advance(),
                }
            }
        }

        // every record matching when the cursor opened was yielded, moved ones included
        let mut seen: Vec<String> = seen.into_iter().collect();
        seen.sort();
        assert_eq!(seen, matching);
        assert_people_consistent(&people, &expected, &mut rng);
    }
}

#[timeout(5000)]
#[test]
fn test_deleted_slots_are_reused() {
    let mut keyed = create_keyed(&[1, 2, 3, 4], false).unwrap();
    {
        let mut cursor = keyed
            .storage
            .ordered_mut(keyed.by_key)
            .lookup_to_edit_ascending(None, None);
        while !cursor.is_ended() {
            cursor.delete_current();
        }
    }
    assert_eq!(keyed.storage.record_count(), 0);
    assert!(ascending_keys(&keyed).is_empty());

    {
        let mut allocator = keyed.storage.allocate_and_insert();
        for key in [7i32, 6] {
            allocator.allocate()[0..4].copy_from_slice(&key.to_ne_bytes());
        }
    }
    assert_eq!(ascending_keys(&keyed), vec![6, 7]);
    assert_eq!(
        keyed
            .storage
            .hash(keyed.by_key_hash)
            .lookup_to_read(&7i32.to_ne_bytes())
            .count(),
        1
    );
}

#[timeout(5000)]
#[test]
fn test_concurrent_readers() {
    let people: Vec<Person> = (0..64)
        .map(|position| {
            let offset = position as f32;
            Person::new(&format!("p{position}"), position, [offset, offset + 0.5, -offset, -offset + 0.5])
        })
        .collect();
    let store = create_people(&people).unwrap();
    let storage = &store.storage;

    thread::scope(|scope| {
        for worker in 0..4 {
            let store = &store;
            scope.spawn(move || {
                for position in (worker..64).step_by(4) {
                    let name = format!("p{position}");
                    let found: Vec<Person> = storage
                        .hash(store.by_name)
                        .lookup_to_read(&name_request(&name))
                        .map(Person::read)
                        .collect();
                    assert_eq!(found.len(), 1);
                    assert_eq!(found[0].age, position as i32);
                }

                let ages = storage
                    .ordered(store.by_age)
                    .lookup_to_read_ascending(Some(&10i32.to_ne_bytes()), Some(&19i32.to_ne_bytes()))
                    .count();
                assert_eq!(ages, 10);

                let shape = encode_shape(&[(0.0f32, 63.5), (-63.0, 0.5)]);
                let everyone = storage
                    .volumetric(store.space)
                    .lookup_shape_intersection_to_read(&shape)
                    .count();
                assert_eq!(everyone, 64);
            });
        }
    });

    assert_eq!(storage.active_readers(), 0);
}

#[timeout(1000)]
#[test]
fn test_config_round_trip_and_defaults() {
    let config = StoreConfig {
        records_per_chunk: 4,
        ..Default::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(serde_json::from_str::<StoreConfig>(&json).unwrap(), config);

    let partial: StoreConfig = serde_json::from_str(r#"{ "ordered_full_resort_ratio": 2 }"#).unwrap();
    assert_eq!(partial.records_per_chunk, StoreConfig::default().records_per_chunk);
    assert_eq!(partial.ordered_full_resort_ratio, 2);

    let people: Vec<Person> = (0..10)
        .map(|position| Person::new(&format!("n{position}"), position, [0.0, 1.0, 0.0, 1.0]))
        .collect();
    let store = create_people_with_config(&people, config).unwrap();
    assert_eq!(store.storage.config().records_per_chunk, 4);
    assert_eq!(store.storage.record_count(), 10);
    assert_eq!(store.storage.ordered(store.by_age).len(), 10);
}
