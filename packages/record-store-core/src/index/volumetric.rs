//! Volumetric index: a uniform grid of leaves over record bounding boxes.
//!
//! Every dimension is a `(min field, max field)` pair of the record plus the
//! global borders of the grid along that axis. A record is registered in each
//! leaf its box covers; boxes reaching past the borders are clamped to the
//! outermost leaves.
//!
//! Cursors walk leaves one by one and deduplicate records spanning several
//! leaves with a visited set. Edits are applied to the grid as soon as an
//! edition ends, including edits made through this index's own cursor.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{self, AtomicUsize};

use super::{IndexBase, IndexId};
use crate::arena::{RecordArena, RecordId};
use crate::config::StoreConfig;
use crate::mapping::{Field, FieldId};
use crate::storage::Storage;

/// Maximum number of dimensions of a volumetric index.
pub const MAX_DIMENSIONS: usize = 4;

/// Grid depth per dimension count. An index over `n` dimensions has
/// `2^(LEVELS[n - 1] - 1)` leaves along every axis.
const LEVELS: [u32; MAX_DIMENSIONS] = [11, 7, 5, 4];

const EPSILON: f64 = 1e-5;

type Coordinate = [i64; MAX_DIMENSIONS];

/// One axis of a volumetric index, as passed to
/// [`Storage::create_volumetric_index`](crate::Storage::create_volumetric_index).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionDescriptor {
    pub min_field: FieldId,
    pub global_min_border: f64,
    pub max_field: FieldId,
    pub global_max_border: f64,
}

/// Resolved axis.
#[derive(Debug, Clone)]
pub(crate) struct Dimension {
    pub(crate) min_field: Field,
    pub(crate) global_min_border: f64,
    pub(crate) max_field: Field,
    pub(crate) global_max_border: f64,
}

/// Inclusive box of leaf coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sector {
    min: Coordinate,
    max: Coordinate,
}

impl Sector {
    fn contains(&self, coordinate: &Coordinate, dimensions: usize) -> bool {
        (0..dimensions).all(|axis| (self.min[axis]..=self.max[axis]).contains(&coordinate[axis]))
    }

    fn coordinates(&self, dimensions: usize) -> Vec<Coordinate> {
        let mut coordinate = self.min;
        let mut coordinates = vec![coordinate];
        while next_inside_sector(&mut coordinate, self, dimensions) {
            coordinates.push(coordinate);
        }
        coordinates
    }
}

/// Steps to the next coordinate of `sector`, first axis fastest.
fn next_inside_sector(coordinate: &mut Coordinate, sector: &Sector, dimensions: usize) -> bool {
    for axis in 0..dimensions {
        if coordinate[axis] < sector.max[axis] {
            coordinate[axis] += 1;
            coordinate[..axis].copy_from_slice(&sector.min[..axis]);
            return true;
        }
    }
    false
}

/// Ray parameter at which the ray enters the box, or `None` if it misses.
///
/// A ray starting inside the box enters at `0`.
fn ray_box_entry(origin: &[f64], direction: &[f64], min: &[f64], max: &[f64]) -> Option<f64> {
    let mut enter = 0.0f64;
    let mut exit = f64::INFINITY;
    for axis in 0..origin.len() {
        if direction[axis].abs() < EPSILON {
            if origin[axis] < min[axis] || origin[axis] > max[axis] {
                return None;
            }
            continue;
        }

        let near = (min[axis] - origin[axis]) / direction[axis];
        let far = (max[axis] - origin[axis]) / direction[axis];
        enter = enter.max(near.min(far));
        exit = exit.min(near.max(far));
        if enter > exit {
            return None;
        }
    }
    Some(enter)
}

fn length(vector: &[f64]) -> f64 {
    vector.iter().map(|component| component * component).sum::<f64>().sqrt()
}

/// Volumetric index state owned by the storage.
#[derive(Debug)]
pub(crate) struct VolumetricIndex {
    id: IndexId,
    field_ids: Vec<FieldId>,
    dimensions: Vec<Dimension>,
    leaves_per_axis: i64,
    leaf_sizes: [f64; MAX_DIMENSIONS],
    leaves: Vec<Vec<RecordId>>,
    active_cursors: AtomicUsize,
}

impl VolumetricIndex {
    pub(crate) fn new(id: IndexId, field_ids: Vec<FieldId>, dimensions: Vec<Dimension>) -> Self {
        assert!((1..=MAX_DIMENSIONS).contains(&dimensions.len()));

        let leaves_per_axis = 1i64 << (LEVELS[dimensions.len() - 1] - 1);
        let mut leaf_sizes = [0.0; MAX_DIMENSIONS];
        for (size, dimension) in leaf_sizes.iter_mut().zip(&dimensions) {
            *size = (dimension.global_max_border - dimension.global_min_border) / leaves_per_axis as f64;
        }
        let leaf_count = (0..dimensions.len()).fold(1usize, |count, _| count * leaves_per_axis as usize);

        Self {
            id,
            field_ids,
            dimensions,
            leaves_per_axis,
            leaf_sizes,
            leaves: vec![Vec::new(); leaf_count],
            active_cursors: AtomicUsize::new(0),
        }
    }

    fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Leaf coordinate of a world value along `axis`, clamped to the grid.
    fn coordinate(&self, axis: usize, value: f64) -> i64 {
        let dimension = &self.dimensions[axis];
        let cell = ((value - dimension.global_min_border) / self.leaf_sizes[axis]).floor();
        (cell as i64).clamp(0, self.leaves_per_axis - 1)
    }

    fn leaf_index(&self, coordinate: &Coordinate) -> usize {
        (0..self.dimension_count())
            .rev()
            .fold(0usize, |index, axis| index * self.leaves_per_axis as usize + coordinate[axis] as usize)
    }

    fn leaf(&self, coordinate: &Coordinate) -> &[RecordId] {
        &self.leaves[self.leaf_index(coordinate)]
    }

    fn sector_of_bounds(&self, min: &[f64], max: &[f64]) -> Sector {
        let mut sector = Sector {
            min: [0; MAX_DIMENSIONS],
            max: [0; MAX_DIMENSIONS],
        };
        for axis in 0..self.dimension_count() {
            sector.min[axis] = self.coordinate(axis, min[axis]);
            sector.max[axis] = self.coordinate(axis, max[axis]);
        }
        sector
    }

    fn record_bounds(&self, record: &[u8]) -> ([f64; MAX_DIMENSIONS], [f64; MAX_DIMENSIONS]) {
        let mut min = [0.0; MAX_DIMENSIONS];
        let mut max = [0.0; MAX_DIMENSIONS];
        for (axis, dimension) in self.dimensions.iter().enumerate() {
            min[axis] = dimension.min_field.to_f64(dimension.min_field.value(record));
            max[axis] = dimension.max_field.to_f64(dimension.max_field.value(record));
        }
        (min, max)
    }

    fn sector_of_record(&self, record: &[u8]) -> Sector {
        let (min, max) = self.record_bounds(record);
        self.sector_of_bounds(&min, &max)
    }

    fn axis_size(&self) -> usize {
        self.dimensions[0].min_field.size
    }

    /// Splits an encoded block into per-axis `(first, second)` values.
    fn axis_pair<'b>(&self, block: &'b [u8], axis: usize) -> (&'b [u8], &'b [u8]) {
        let size = self.axis_size();
        let offset = axis * 2 * size;
        (&block[offset..offset + size], &block[offset + size..offset + 2 * size])
    }

    fn check_block_size(&self, block: &[u8], kind: &str) {
        assert_eq!(
            block.len(),
            self.dimension_count() * 2 * self.axis_size(),
            "{kind} size must match the index dimensions"
        );
    }

    fn intersects_shape(&self, record: &[u8], shape: &[u8]) -> bool {
        self.dimensions.iter().enumerate().all(|(axis, dimension)| {
            let field = &dimension.min_field;
            let (shape_min, shape_max) = self.axis_pair(shape, axis);
            let record_min = field.value(record);
            let record_max = dimension.max_field.value(record);
            matches!(
                field.compare_numeric(shape_max, record_min),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                field.compare_numeric(shape_min, record_max),
                Some(Ordering::Less | Ordering::Equal)
            )
        })
    }

    fn remove_from_leaf(&mut self, coordinate: &Coordinate, record: RecordId) {
        let index = self.leaf_index(coordinate);
        let leaf = &mut self.leaves[index];
        let position = leaf
            .iter()
            .position(|candidate| *candidate == record)
            .unwrap_or_else(|| panic!("record {record:?} is missing from volumetric index {:?}", self.id));
        leaf.swap_remove(position);
    }
}

impl IndexBase for VolumetricIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn indexed_fields(&self) -> &[FieldId] {
        &self.field_ids
    }

    fn can_be_dropped(&self) -> bool {
        self.active_cursors.load(atomic::Ordering::Acquire) == 0
    }

    fn insert_record(&mut self, record: RecordId, records: &RecordArena) {
        let sector = self.sector_of_record(records.get(record));
        for coordinate in sector.coordinates(self.dimension_count()) {
            let index = self.leaf_index(&coordinate);
            self.leaves[index].push(record);
        }
    }

    fn on_record_changed(&mut self, record: RecordId, backup: &[u8], records: &RecordArena) {
        let old = self.sector_of_record(backup);
        let new = self.sector_of_record(records.get(record));
        if old == new {
            return;
        }

        let dimensions = self.dimension_count();
        for coordinate in old.coordinates(dimensions) {
            if !new.contains(&coordinate, dimensions) {
                self.remove_from_leaf(&coordinate, record);
            }
        }
        for coordinate in new.coordinates(dimensions) {
            if !old.contains(&coordinate, dimensions) {
                let index = self.leaf_index(&coordinate);
                self.leaves[index].push(record);
            }
        }
    }

    fn on_record_deleted(&mut self, record: RecordId, backup: &[u8], _records: &RecordArena) {
        let sector = self.sector_of_record(backup);
        for coordinate in sector.coordinates(self.dimension_count()) {
            self.remove_from_leaf(&coordinate, record);
        }
    }

    fn on_writer_closed(&mut self, _records: &RecordArena, _config: &StoreConfig) {}
}

#[derive(Debug, Clone)]
struct RayWalk {
    origin: [f64; MAX_DIMENSIONS],
    direction: [f64; MAX_DIMENSIONS],
    /// Current position in leaf units.
    point: [f64; MAX_DIMENSIONS],
    /// Direction in leaf units.
    grid_direction: [f64; MAX_DIMENSIONS],
    distance: f64,
    max_distance: f64,
}

#[derive(Debug, Clone)]
enum Query {
    Shape { shape: Box<[u8]>, sector: Sector },
    Ray(RayWalk),
}

/// Leaf-by-leaf walk shared by read and edit cursors.
#[derive(Debug, Clone)]
struct Walker {
    query: Query,
    coordinate: Coordinate,
    record_index: usize,
    visited: HashSet<RecordId>,
    finished: bool,
}

impl Walker {
    fn shape(index: &VolumetricIndex, records: &RecordArena, shape: &[u8]) -> Self {
        index.check_block_size(shape, "shape");

        let dimensions = index.dimension_count();
        let mut min = [0.0; MAX_DIMENSIONS];
        let mut max = [0.0; MAX_DIMENSIONS];
        for (axis, dimension) in index.dimensions.iter().enumerate() {
            let field = &dimension.min_field;
            let (shape_min, shape_max) = index.axis_pair(shape, axis);
            assert!(
                field.compare_numeric(shape_min, shape_max) != Some(Ordering::Greater),
                "shape minimum must not exceed its maximum on axis {axis}"
            );
            min[axis] = field.to_f64(shape_min);
            max[axis] = field.to_f64(shape_max);
        }
        let sector = index.sector_of_bounds(&min[..dimensions], &max[..dimensions]);

        let mut walker = Self {
            query: Query::Shape {
                shape: shape.into(),
                sector,
            },
            coordinate: sector.min,
            record_index: 0,
            visited: HashSet::new(),
            finished: false,
        };
        walker.settle(index, records);
        walker
    }

    fn ray(index: &VolumetricIndex, records: &RecordArena, ray: &[u8], max_distance: f64) -> Self {
        index.check_block_size(ray, "ray");

        let dimensions = index.dimension_count();
        let mut origin = [0.0; MAX_DIMENSIONS];
        let mut direction = [0.0; MAX_DIMENSIONS];
        let mut border_min = [0.0; MAX_DIMENSIONS];
        let mut border_max = [0.0; MAX_DIMENSIONS];
        for (axis, dimension) in index.dimensions.iter().enumerate() {
            let field = &dimension.min_field;
            let (ray_origin, ray_direction) = index.axis_pair(ray, axis);
            origin[axis] = field.to_f64(ray_origin);
            direction[axis] = field.to_f64(ray_direction);
            border_min[axis] = dimension.global_min_border;
            border_max[axis] = dimension.global_max_border;
        }
        assert!(
            direction[..dimensions].iter().any(|component| component.abs() >= EPSILON),
            "ray direction must not be zero"
        );

        let mut walk = RayWalk {
            origin,
            direction,
            point: [0.0; MAX_DIMENSIONS],
            grid_direction: [0.0; MAX_DIMENSIONS],
            distance: 0.0,
            max_distance,
        };
        let mut coordinate = [0; MAX_DIMENSIONS];
        let entry = ray_box_entry(
            &origin[..dimensions],
            &direction[..dimensions],
            &border_min[..dimensions],
            &border_max[..dimensions],
        );

        let finished = match entry {
            Some(t) => {
                for axis in 0..dimensions {
                    let world = origin[axis] + direction[axis] * t;
                    walk.point[axis] = (world - border_min[axis]) / index.leaf_sizes[axis];
                    walk.grid_direction[axis] = direction[axis] / index.leaf_sizes[axis];
                    coordinate[axis] = index.coordinate(axis, world);
                }
                walk.distance = t * length(&direction[..dimensions]);
                walk.distance > max_distance
            }
            None => true,
        };

        let mut walker = Self {
            query: Query::Ray(walk),
            coordinate,
            record_index: 0,
            visited: HashSet::new(),
            finished,
        };
        walker.settle(index, records);
        walker
    }

    fn current(&self, index: &VolumetricIndex) -> Option<RecordId> {
        if self.finished {
            return None;
        }
        index.leaf(&self.coordinate).get(self.record_index).copied()
    }

    /// Moves forward until the current slot holds an unvisited matching record.
    ///
    /// Every record checked on the way is marked visited.
    fn settle(&mut self, index: &VolumetricIndex, records: &RecordArena) {
        while !self.finished {
            match index.leaf(&self.coordinate).get(self.record_index).copied() {
                Some(record) => {
                    if self.visited.insert(record) && self.matches(index, records.get(record)) {
                        return;
                    }
                    self.record_index += 1;
                }
                None => {
                    self.record_index = 0;
                    self.finished = !self.next_leaf(index);
                }
            }
        }
    }

    fn advance(&mut self, index: &VolumetricIndex, records: &RecordArena) {
        assert!(self.current(index).is_some(), "cursor has already ended");
        self.record_index += 1;
        self.settle(index, records);
    }

    fn matches(&self, index: &VolumetricIndex, record: &[u8]) -> bool {
        match &self.query {
            Query::Shape { shape, .. } => index.intersects_shape(record, shape),
            Query::Ray(walk) => {
                let dimensions = index.dimension_count();
                let (min, max) = index.record_bounds(record);
                ray_box_entry(
                    &walk.origin[..dimensions],
                    &walk.direction[..dimensions],
                    &min[..dimensions],
                    &max[..dimensions],
                )
                .is_some_and(|t| t * length(&walk.direction[..dimensions]) <= walk.max_distance)
            }
        }
    }

    fn next_leaf(&mut self, index: &VolumetricIndex) -> bool {
        let dimensions = index.dimension_count();
        match &mut self.query {
            Query::Shape { sector, .. } => next_inside_sector(&mut self.coordinate, sector, dimensions),
            Query::Ray(walk) => {
                let mut step: Option<(usize, f64)> = None;
                for axis in 0..dimensions {
                    let direction = walk.grid_direction[axis];
                    if walk.direction[axis].abs() < EPSILON {
                        continue;
                    }
                    let target = self.coordinate[axis] as f64 + if direction > 0.0 { 1.0 } else { 0.0 };
                    let t = ((target - walk.point[axis]) / direction).max(0.0);
                    if step.map_or(true, |(_, best)| t < best) {
                        step = Some((axis, t));
                    }
                }

                let Some((axis, t)) = step else {
                    return false;
                };
                self.coordinate[axis] += if walk.grid_direction[axis] > 0.0 { 1 } else { -1 };
                for component in 0..dimensions {
                    walk.point[component] += walk.grid_direction[component] * t;
                }
                walk.distance += t * length(&walk.direction[..dimensions]);

                walk.distance <= walk.max_distance
                    && self.coordinate[..dimensions]
                        .iter()
                        .all(|coordinate| (0..index.leaves_per_axis).contains(coordinate))
            }
        }
    }
}

/// Little helper trait for [`encode_shape`] and [`encode_ray`].
pub trait AxisValue: Copy {
    /// Appends the native-endian bytes of the value.
    fn append_to(self, output: &mut Vec<u8>);
}

macro_rules! impl_axis_value {
    ($($ty:ty),*) => {
        $(
            impl AxisValue for $ty {
                fn append_to(self, output: &mut Vec<u8>) {
                    output.extend_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_axis_value!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Encodes a shape as `[min0, max0, min1, max1, ...]`.
pub fn encode_shape<T: AxisValue>(bounds: &[(T, T)]) -> Vec<u8> {
    let mut output = Vec::with_capacity(bounds.len() * 2 * std::mem::size_of::<T>());
    for (min, max) in bounds {
        min.append_to(&mut output);
        max.append_to(&mut output);
    }
    output
}

/// Encodes a ray as `[origin0, direction0, origin1, direction1, ...]`.
///
/// # Panics
/// Panics if `origin` and `direction` differ in length.
pub fn encode_ray<T: AxisValue>(origin: &[T], direction: &[T]) -> Vec<u8> {
    assert_eq!(origin.len(), direction.len(), "ray origin and direction must have the same length");
    let mut output = Vec::with_capacity(origin.len() * 2 * std::mem::size_of::<T>());
    for (origin, direction) in origin.iter().zip(direction) {
        origin.append_to(&mut output);
        direction.append_to(&mut output);
    }
    output
}

/// Read access to a volumetric index.
#[derive(Debug, Clone, Copy)]
pub struct VolumetricIndexRef<'a> {
    storage: &'a Storage,
    index: &'a VolumetricIndex,
}

impl<'a> VolumetricIndexRef<'a> {
    pub(crate) fn new(storage: &'a Storage, slot: usize) -> Self {
        Self {
            storage,
            index: &storage.indices.volumetric[slot].index,
        }
    }

    /// Returns the number of dimensions.
    pub fn dimension_count(&self) -> usize {
        self.index.dimension_count()
    }

    /// Returns the number of leaves along every axis.
    pub fn leaves_per_axis(&self) -> usize {
        self.index.leaves_per_axis as usize
    }

    /// Returns the dimension fields as `[min0, max0, min1, max1, ...]`.
    pub fn indexed_fields(&self) -> &'a [FieldId] {
        &self.index.field_ids
    }

    /// Returns `true` when no cursor is open.
    pub fn can_be_dropped(&self) -> bool {
        self.index.can_be_dropped()
    }

    /// Reads every record whose box intersects `shape`. Touching boxes intersect.
    ///
    /// # Arguments
    /// * `shape` - `[min0, max0, min1, max1, ...]` in the axis type, see [`encode_shape`]
    ///
    /// # Panics
    /// Panics if the shape size does not match the index or a minimum exceeds its maximum.
    pub fn lookup_shape_intersection_to_read(&self, shape: &[u8]) -> VolumetricReadCursor<'a> {
        let walker = Walker::shape(self.index, &self.storage.records, shape);
        VolumetricReadCursor::new(self.storage, self.index, walker)
    }

    /// Reads every record whose box the ray hits within `max_distance` of its origin.
    ///
    /// Records come out leaf by leaf along the ray.
    ///
    /// # Arguments
    /// * `ray` - `[origin0, direction0, origin1, direction1, ...]` in the axis type, see [`encode_ray`]
    /// * `max_distance` - Distance limit in world units
    ///
    /// # Panics
    /// Panics if the ray size does not match the index or the direction is zero.
    pub fn lookup_ray_intersection_to_read(&self, ray: &[u8], max_distance: f64) -> VolumetricReadCursor<'a> {
        let walker = Walker::ray(self.index, &self.storage.records, ray, max_distance);
        VolumetricReadCursor::new(self.storage, self.index, walker)
    }
}

/// Edit access to a volumetric index.
#[derive(Debug)]
pub struct VolumetricIndexMut<'a> {
    storage: &'a mut Storage,
    slot: usize,
}

impl<'a> VolumetricIndexMut<'a> {
    pub(crate) fn new(storage: &'a mut Storage, slot: usize) -> Self {
        Self { storage, slot }
    }

    /// Edits every record whose box intersects `shape`.
    pub fn lookup_shape_intersection_to_edit(self, shape: &[u8]) -> VolumetricEditCursor<'a> {
        VolumetricEditCursor::new(self.storage, self.slot, |index, records| {
            Walker::shape(index, records, shape)
        })
    }

    /// Edits every record whose box the ray hits within `max_distance`.
    pub fn lookup_ray_intersection_to_edit(self, ray: &[u8], max_distance: f64) -> VolumetricEditCursor<'a> {
        VolumetricEditCursor::new(self.storage, self.slot, |index, records| {
            Walker::ray(index, records, ray, max_distance)
        })
    }
}

/// Shared cursor over a shape or ray query.
#[derive(Debug)]
pub struct VolumetricReadCursor<'a> {
    storage: &'a Storage,
    index: &'a VolumetricIndex,
    walker: Walker,
}

impl<'a> VolumetricReadCursor<'a> {
    fn new(storage: &'a Storage, index: &'a VolumetricIndex, walker: Walker) -> Self {
        storage.register_reader();
        index.active_cursors.fetch_add(1, atomic::Ordering::AcqRel);
        Self {
            storage,
            index,
            walker,
        }
    }

    /// Returns the current record, or `None` once the cursor has ended.
    pub fn current(&self) -> Option<&'a [u8]> {
        let storage = self.storage;
        self.walker
            .current(self.index)
            .map(|record| storage.records.get(record))
    }

    /// Moves to the next matching record.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn advance(&mut self) {
        self.walker.advance(self.index, &self.storage.records);
    }

    /// Returns `true` once every matching record has been visited.
    pub fn is_ended(&self) -> bool {
        self.walker.current(self.index).is_none()
    }
}

impl Clone for VolumetricReadCursor<'_> {
    fn clone(&self) -> Self {
        Self::new(self.storage, self.index, self.walker.clone())
    }
}

impl<'a> Iterator for VolumetricReadCursor<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.current()?;
        self.advance();
        Some(record)
    }
}

impl Drop for VolumetricReadCursor<'_> {
    fn drop(&mut self) {
        self.index.active_cursors.fetch_sub(1, atomic::Ordering::AcqRel);
        self.storage.unregister_reader();
    }
}

/// Exclusive cursor over a shape or ray query.
///
/// A record leaving the query region through an edit is not revisited.
#[derive(Debug)]
pub struct VolumetricEditCursor<'a> {
    storage: &'a mut Storage,
    slot: usize,
    walker: Walker,
}

impl<'a> VolumetricEditCursor<'a> {
    fn new(
        storage: &'a mut Storage,
        slot: usize,
        start: impl FnOnce(&VolumetricIndex, &RecordArena) -> Walker,
    ) -> Self {
        let walker = start(&storage.indices.volumetric[slot].index, &storage.records);
        storage.register_writer();
        *storage.indices.volumetric[slot].index.active_cursors.get_mut() += 1;

        let mut cursor = Self { storage, slot, walker };
        cursor.begin_current();
        cursor
    }

    /// Returns the current record for modification.
    pub fn current(&mut self) -> Option<&mut [u8]> {
        let record = self.current_record()?;
        Some(self.storage.records.get_mut(record))
    }

    /// Applies changes to the current record and moves to the next one.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn advance(&mut self) {
        let record = self
            .current_record()
            .unwrap_or_else(|| panic!("cursor has already ended"));
        self.storage.end_record_edition(record, None);
        self.settle();
        self.begin_current();
    }

    /// Deletes the current record from the storage and moves to the next one.
    ///
    /// # Panics
    /// Panics if the cursor has already ended.
    pub fn delete_current(&mut self) {
        let record = self
            .current_record()
            .unwrap_or_else(|| panic!("cursor has already ended"));
        self.storage.delete_record(record, None);
        self.settle();
        self.begin_current();
    }

    /// Returns `true` once every matching record has been visited.
    pub fn is_ended(&self) -> bool {
        self.current_record().is_none()
    }

    /// Closes the cursor.
    pub fn close(self) {}

    fn index(&self) -> &VolumetricIndex {
        &self.storage.indices.volumetric[self.slot].index
    }

    fn current_record(&self) -> Option<RecordId> {
        self.walker.current(self.index())
    }

    /// Re-validates the walk after the grid changed under it.
    fn settle(&mut self) {
        let index = &self.storage.indices.volumetric[self.slot].index;
        self.walker.settle(index, &self.storage.records);
    }

    fn begin_current(&mut self) {
        if let Some(record) = self.current_record() {
            self.storage.begin_record_edition(record);
        }
    }
}

impl Drop for VolumetricEditCursor<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.current_record() {
            self.storage.end_record_edition(record, None);
        }
        *self.storage.indices.volumetric[self.slot]
            .index
            .active_cursors
            .get_mut() -= 1;
        self.storage.unregister_writer();
    }
}
