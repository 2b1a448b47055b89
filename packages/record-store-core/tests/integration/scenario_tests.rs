//! Scenarios driving edits and deletions through every index kind.

use ntest::timeout;

use record_store_core::{encode_ray, encode_shape};

use super::helpers::{ascending_keys, create_keyed, create_people, key_of, name_request, Person};

fn people() -> Vec<Person> {
    vec![
        Person::new("hugo", 30, [10.0, 11.0, 8.0, 9.0]),
        Person::new("karl", 25, [-2.0, 0.0, 1.0, 2.0]),
        Person::new("xavier", 40, [15.0, 19.0, 8.0, 11.0]),
    ]
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[timeout(1000)]
#[test]
fn test_individual_and_bulk_insertion_read_sorted() {
    for bulk in [false, true] {
        let keyed = create_keyed(&[5, 3, 8, 1], bulk).unwrap();
        assert_eq!(ascending_keys(&keyed), vec![1, 3, 5, 8], "bulk: {bulk}");

        let descending: Vec<i32> = keyed
            .storage
            .ordered(keyed.by_key)
            .lookup_to_read_descending(None, None)
            .map(key_of)
            .collect();
        assert_eq!(descending, vec![8, 5, 3, 1], "bulk: {bulk}");
    }
}

#[timeout(1000)]
#[test]
fn test_ordered_edit_then_delete() {
    let mut keyed = create_keyed(&[5, 3, 8, 1], false).unwrap();

    {
        let three = 3i32.to_ne_bytes();
        let mut cursor = keyed
            .storage
            .ordered_mut(keyed.by_key)
            .lookup_to_edit_ascending(Some(&three), Some(&three));
        let record = cursor.current().unwrap();
        record[0..4].copy_from_slice(&9i32.to_ne_bytes());
        cursor.advance();
        assert!(cursor.is_ended());
        cursor.close();
    }
    assert_eq!(ascending_keys(&keyed), vec![1, 5, 8, 9]);
    let hash = keyed.storage.hash(keyed.by_key_hash);
    assert!(hash.lookup_to_read(&3i32.to_ne_bytes()).is_ended());
    assert_eq!(hash.lookup_to_read(&9i32.to_ne_bytes()).count(), 1);

    {
        let eight = 8i32.to_ne_bytes();
        let mut cursor = keyed
            .storage
            .ordered_mut(keyed.by_key)
            .lookup_to_edit_ascending(Some(&eight), None);
        assert_eq!(cursor.current().map(|record| key_of(record)), Some(8));
        cursor.delete_current();
        assert_eq!(cursor.current().map(|record| key_of(record)), Some(9));
    }
    assert_eq!(ascending_keys(&keyed), vec![1, 5, 9]);
    assert_eq!(keyed.storage.record_count(), 3);
    assert!(keyed
        .storage
        .hash(keyed.by_key_hash)
        .lookup_to_read(&8i32.to_ne_bytes())
        .is_ended());
}

#[timeout(1000)]
#[test]
fn test_ordered_cursor_walks_old_order_until_closed() {
    let mut keyed = create_keyed(&[5, 3, 8, 1], false).unwrap();

    let mut seen = Vec::new();
    {
        let mut cursor = keyed
            .storage
            .ordered_mut(keyed.by_key)
            .lookup_to_edit_ascending(None, None);
        while let Some(record) = cursor.current() {
            let key = key_of(record);
            seen.push(key);
            record[0..4].copy_from_slice(&(-key).to_ne_bytes());
            cursor.advance();
        }
    }

    assert_eq!(seen, vec![1, 3, 5, 8]);
    assert_eq!(ascending_keys(&keyed), vec![-8, -5, -3, -1]);
}

#[timeout(1000)]
#[test]
fn test_queries_of_every_kind() {
    let people = create_people(&people()).unwrap();
    let storage = &people.storage;

    let hugo: Vec<Person> = storage
        .hash(people.by_name)
        .lookup_to_read(&name_request("hugo"))
        .map(Person::read)
        .collect();
    assert_eq!(hugo, vec![Person::new("hugo", 30, [10.0, 11.0, 8.0, 9.0])]);

    let by_age: Vec<String> = storage
        .ordered(people.by_age)
        .lookup_to_read_ascending(Some(&26i32.to_ne_bytes()), None)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(by_age, vec!["hugo", "xavier"]);

    let ray = encode_ray(&[-3.0f32, 0.0], &[2.0, 1.0]);
    let along_ray: Vec<String> = storage
        .volumetric(people.space)
        .lookup_ray_intersection_to_read(&ray, 100.0)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(along_ray, vec!["karl", "xavier"]);

    let shape = encode_shape(&[(-3.0f32, 11.0), (0.0, 11.0)]);
    let inside: Vec<String> = storage
        .volumetric(people.space)
        .lookup_shape_intersection_to_read(&shape)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(sorted(inside), vec!["hugo", "karl"]);
}

#[timeout(1000)]
#[test]
fn test_edits_and_deletes_through_every_index_kind() {
    let mut people = create_people(&people()).unwrap();
    let right_side = encode_shape(&[(12.0f32, 20.0), (0.0, 11.0)]);

    // hash cursor: hugo gets older
    {
        let mut cursor = people
            .storage
            .hash_mut(people.by_name)
            .lookup_to_edit(&name_request("hugo"));
        let record = cursor.current().unwrap();
        record[12..16].copy_from_slice(&50i32.to_ne_bytes());
    }
    let by_age: Vec<String> = people
        .storage
        .ordered(people.by_age)
        .lookup_to_read_ascending(None, None)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(by_age, vec!["karl", "xavier", "hugo"]);

    // ordered cursor: karl moves next to xavier
    {
        let age = 25i32.to_ne_bytes();
        let mut cursor = people
            .storage
            .ordered_mut(people.by_age)
            .lookup_to_edit_ascending(Some(&age), Some(&age));
        let record = cursor.current().unwrap();
        Person::new("karl", 25, [12.0, 13.0, 3.0, 4.0]).write(record);
    }
    let right: Vec<String> = people
        .storage
        .volumetric(people.space)
        .lookup_shape_intersection_to_read(&right_side)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(sorted(right), vec!["karl", "xavier"]);

    // volumetric cursor: xavier leaves, karl is renamed
    {
        let mut cursor = people
            .storage
            .volumetric_mut(people.space)
            .lookup_shape_intersection_to_edit(&right_side);
        while let Some(record) = cursor.current() {
            if Person::read(record).name == "xavier" {
                cursor.delete_current();
            } else {
                record[..12].copy_from_slice(&name_request("carl"));
                cursor.advance();
            }
        }
    }

    let storage = &people.storage;
    assert_eq!(storage.record_count(), 2);
    assert!(storage
        .hash(people.by_name)
        .lookup_to_read(&name_request("xavier"))
        .is_ended());
    assert!(storage
        .hash(people.by_name)
        .lookup_to_read(&name_request("karl"))
        .is_ended());
    assert_eq!(
        storage
            .hash(people.by_name)
            .lookup_to_read(&name_request("carl"))
            .map(|record| Person::read(record).age)
            .collect::<Vec<_>>(),
        vec![25]
    );
    assert_eq!(storage.ordered(people.by_age).len(), 2);

    let right: Vec<String> = storage
        .volumetric(people.space)
        .lookup_shape_intersection_to_read(&right_side)
        .map(|record| Person::read(record).name)
        .collect();
    assert_eq!(right, vec!["carl"]);

    let ray = encode_ray(&[-3.0f32, 0.0], &[2.0, 1.0]);
    assert!(storage
        .volumetric(people.space)
        .lookup_ray_intersection_to_read(&ray, 100.0)
        .is_ended());
}

#[timeout(1000)]
#[test]
fn test_dropped_index_stops_tracking_fields() {
    let mut people = create_people(&people()).unwrap();
    people.storage.drop_ordered_index(people.by_age);
    assert_eq!(people.storage.ordered_indices().count(), 0);

    {
        let mut cursor = people
            .storage
            .hash_mut(people.by_name)
            .lookup_to_edit(&name_request("karl"));
        let record = cursor.current().unwrap();
        record[12..16].copy_from_slice(&99i32.to_ne_bytes());
    }

    let karl: Vec<i32> = people
        .storage
        .hash(people.by_name)
        .lookup_to_read(&name_request("karl"))
        .map(|record| Person::read(record).age)
        .collect();
    assert_eq!(karl, vec![99]);
}
