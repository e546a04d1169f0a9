//! Model Store
//!
//! Sparse nested maps for every model family plus the transient learning
//! buffers and maturity counters. The store is plain data: the caller owns it
//! and lends it to the engines for one call at a time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{BucketKey, TempKey, UnitId, WindBucket};

/// State of one model cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    /// Nothing learned yet; the bucket may still be collecting samples.
    Absent,
    Value(f64),
}

impl Cell {
    pub fn value(self) -> Option<f64> {
        match self {
            Cell::Absent => None,
            Cell::Value(v) => Some(v),
        }
    }

    /// Absent cells predict nothing while they collect.
    pub fn value_or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_present(self) -> bool {
        matches!(self, Cell::Value(_))
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Absent, Cell::Value)
    }
}

/// `temp_key -> wind_bucket -> value`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketMap(BTreeMap<TempKey, BTreeMap<WindBucket, f64>>);

impl BucketMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(degrees, bucket, value)` triples.
    pub fn from_cells<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = (i32, WindBucket, f64)>,
    {
        let mut map = Self::new();
        for (degrees, bucket, value) in cells {
            map.insert(BucketKey::new(TempKey(degrees), bucket), value);
        }
        map
    }

    pub fn cell(&self, key: BucketKey) -> Cell {
        self.0
            .get(&key.temp_key)
            .and_then(|buckets| buckets.get(&key.wind_bucket))
            .copied()
            .into()
    }

    pub fn get(&self, key: BucketKey) -> Option<f64> {
        self.cell(key).value()
    }

    pub fn contains(&self, key: BucketKey) -> bool {
        self.cell(key).is_present()
    }

    pub fn insert(&mut self, key: BucketKey, value: f64) {
        self.0
            .entry(key.temp_key)
            .or_default()
            .insert(key.wind_bucket, value);
    }

    /// All wind buckets learned at one temperature.
    pub fn buckets_at(&self, temp_key: TempKey) -> Option<&BTreeMap<WindBucket, f64>> {
        self.0.get(&temp_key).filter(|buckets| !buckets.is_empty())
    }

    /// Temperature keys holding at least one bucket, coldest first.
    pub fn populated_keys(&self) -> impl Iterator<Item = TempKey> + '_ {
        self.0
            .iter()
            .filter(|(_, buckets)| !buckets.is_empty())
            .map(|(key, _)| *key)
    }

    pub fn has_any_data(&self) -> bool {
        self.populated_keys().next().is_some()
    }

    pub fn cell_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketKey, f64)> + '_ {
        self.0.iter().flat_map(|(temp_key, buckets)| {
            buckets
                .iter()
                .map(move |(bucket, value)| (BucketKey::new(*temp_key, *bucket), *value))
        })
    }
}

/// `temp_key -> coefficient` (solar has no wind dimension)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolarMap(BTreeMap<TempKey, f64>);

impl SolarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = (i32, f64)>,
    {
        Self(
            cells
                .into_iter()
                .map(|(degrees, value)| (TempKey(degrees), value))
                .collect(),
        )
    }

    pub fn cell(&self, temp_key: TempKey) -> Cell {
        self.0.get(&temp_key).copied().into()
    }

    pub fn insert(&mut self, temp_key: TempKey, value: f64) {
        self.0.insert(temp_key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (TempKey, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw observations per bucket, waiting for a cold start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketBuffers(BTreeMap<TempKey, BTreeMap<WindBucket, Vec<f64>>>);

impl BucketBuffers {
    pub fn samples(&self, key: BucketKey) -> &[f64] {
        self.0
            .get(&key.temp_key)
            .and_then(|buckets| buckets.get(&key.wind_bucket))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entry(&mut self, key: BucketKey) -> &mut Vec<f64> {
        self.0
            .entry(key.temp_key)
            .or_default()
            .entry(key.wind_bucket)
            .or_default()
    }

    /// Drop a consumed buffer, pruning the temperature level when it empties.
    pub fn discard(&mut self, key: BucketKey) {
        if let Some(buckets) = self.0.get_mut(&key.temp_key) {
            buckets.remove(&key.wind_bucket);
            if buckets.is_empty() {
                self.0.remove(&key.temp_key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolarBuffers(BTreeMap<TempKey, Vec<f64>>);

impl SolarBuffers {
    pub fn samples(&self, temp_key: TempKey) -> &[f64] {
        self.0.get(&temp_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&mut self, temp_key: TempKey) -> &mut Vec<f64> {
        self.0.entry(temp_key).or_default()
    }

    pub fn discard(&mut self, temp_key: TempKey) {
        self.0.remove(&temp_key);
    }
}

/// Every family's cold-start buffers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningBuffers {
    pub global_base: BucketBuffers,
    pub global_aux: BucketBuffers,
    pub unit_base: BTreeMap<UnitId, BucketBuffers>,
    pub unit_aux: BTreeMap<UnitId, BucketBuffers>,
    pub unit_solar: BTreeMap<UnitId, SolarBuffers>,
}

/// Per-unit EMA update counters, a maturity signal for collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationCounts(BTreeMap<UnitId, BTreeMap<TempKey, BTreeMap<WindBucket, u32>>>);

impl ObservationCounts {
    pub fn get(&self, unit: &str, key: BucketKey) -> u32 {
        self.0
            .get(unit)
            .and_then(|temps| temps.get(&key.temp_key))
            .and_then(|buckets| buckets.get(&key.wind_bucket))
            .copied()
            .unwrap_or(0)
    }

    pub fn increment(&mut self, unit: &str, key: BucketKey) {
        *self
            .0
            .entry(unit.to_string())
            .or_default()
            .entry(key.temp_key)
            .or_default()
            .entry(key.wind_bucket)
            .or_default() += 1;
    }

    pub fn remove_unit(&mut self, unit: &str) {
        self.0.remove(unit);
    }
}

/// All learned state of one building.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStore {
    pub global_base: BucketMap,
    pub global_aux: BucketMap,
    pub unit_base: BTreeMap<UnitId, BucketMap>,
    pub unit_aux: BTreeMap<UnitId, BucketMap>,
    pub unit_solar: BTreeMap<UnitId, SolarMap>,
    pub observation_counts: ObservationCounts,
    pub buffers: LearningBuffers,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_base(&self, unit: &str) -> Option<&BucketMap> {
        self.unit_base.get(unit)
    }

    pub fn unit_aux(&self, unit: &str) -> Option<&BucketMap> {
        self.unit_aux.get(unit)
    }

    pub fn unit_solar(&self, unit: &str) -> Option<&SolarMap> {
        self.unit_solar.get(unit)
    }

    /// Clear every family, buffer and counter.
    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Clear one unit's learned models and counters.
    ///
    /// Its buffers survive so a pending cold start can still complete.
    pub fn reset_unit(&mut self, unit: &str) {
        self.unit_base.remove(unit);
        self.unit_aux.remove(unit);
        self.unit_solar.remove(unit);
        self.observation_counts.remove_unit(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(t: i32, w: WindBucket) -> BucketKey {
        BucketKey::new(TempKey(t), w)
    }

    #[test]
    fn test_cell_lookup_absent_vs_present() {
        let map = BucketMap::from_cells([(5, WindBucket::Normal, 0.0)]);
        assert_eq!(map.cell(key(5, WindBucket::Normal)), Cell::Value(0.0));
        assert_eq!(map.cell(key(5, WindBucket::HighWind)), Cell::Absent);
        assert_eq!(map.cell(key(6, WindBucket::Normal)), Cell::Absent);
        assert_eq!(Cell::Absent.value_or_zero(), 0.0);
    }

    #[test]
    fn test_populated_keys_sorted_by_temperature() {
        let map = BucketMap::from_cells([
            (12, WindBucket::Normal, 1.0),
            (-4, WindBucket::HighWind, 3.0),
            (3, WindBucket::Normal, 2.0),
        ]);
        let keys: Vec<i32> = map.populated_keys().map(TempKey::degrees).collect();
        assert_eq!(keys, vec![-4, 3, 12]);
        assert_eq!(map.cell_count(), 3);
    }

    #[test]
    fn test_store_serializes_as_nested_string_maps() {
        let mut store = ModelStore::new();
        store.global_base.insert(key(-2, WindBucket::HighWind), 3.5);
        store
            .unit_solar
            .entry("sensor.heater".to_string())
            .or_default()
            .insert(TempKey(4), 0.2);

        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json["global_base"]["-2"]["high_wind"], 3.5);
        assert_eq!(json["unit_solar"]["sensor.heater"]["4"], 0.2);

        let back: ModelStore = serde_json::from_value(json).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_missing_sections_deserialize_to_empty() {
        let store: ModelStore =
            serde_json::from_str(r#"{"global_base": {"5": {"normal": 1.25}}}"#).unwrap();
        assert_eq!(store.global_base.get(key(5, WindBucket::Normal)), Some(1.25));
        assert!(store.global_aux.is_empty());
        assert!(store.buffers.global_base.is_empty());
    }

    #[test]
    fn test_buffer_discard_prunes_empty_levels() {
        let mut buffers = BucketBuffers::default();
        buffers.entry(key(1, WindBucket::Normal)).push(2.0);
        assert_eq!(buffers.samples(key(1, WindBucket::Normal)), &[2.0]);
        buffers.discard(key(1, WindBucket::Normal));
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_reset_unit_keeps_buffers() {
        let mut store = ModelStore::new();
        let unit = "sensor.heater".to_string();
        store
            .unit_base
            .entry(unit.clone())
            .or_default()
            .insert(key(0, WindBucket::Normal), 2.0);
        store
            .buffers
            .unit_base
            .entry(unit.clone())
            .or_default()
            .entry(key(1, WindBucket::Normal))
            .push(1.0);
        store.observation_counts.increment(&unit, key(0, WindBucket::Normal));

        store.reset_unit(&unit);

        assert!(store.unit_base(&unit).is_none());
        assert_eq!(store.observation_counts.get(&unit, key(0, WindBucket::Normal)), 0);
        assert_eq!(
            store.buffers.unit_base[&unit].samples(key(1, WindBucket::Normal)),
            &[1.0]
        );

        store.reset_all();
        assert_eq!(store, ModelStore::default());
    }
}
