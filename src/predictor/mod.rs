//! Regime-Aware Predictor
//!
//! Reads one model family and returns a non-negative estimate for a bucket,
//! falling back through neighbours and thermodynamic (delta-T) extrapolation
//! when the exact cell has not been learned yet.
//!
//! Regimes, keyed on `|balance_point - target_temp|`:
//! - **Mild** (<= 4.0): average of the ±1 neighbours, then a calmer wind
//!   bucket at the same temperature, then extrapolation.
//! - **Cold** (> 4.0): straight to extrapolation with a stricter source guard,
//!   so noisy near-balance-point cells are never blended into cold hours.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{
    ModelConfig, COLD_REGIME_DELTA_T, COLD_REGIME_MIN_SOURCE_DELTA_T, DEFAULT_SOLAR_COEFF_COOLING,
    DEFAULT_SOLAR_COEFF_HEATING, MIN_EXTRAPOLATION_DELTA_T,
};
use crate::domain::{BucketKey, TempKey, UnitMode, WindBucket};
use crate::model::{BucketMap, SolarMap};

/// Hard bound on neighbour hops during extrapolation.
pub const MAX_EXTRAPOLATION_DEPTH: u8 = 4;

/// Neighbour values at or below this are treated as "nothing learned".
const NEGLIGIBLE_NEIGHBOUR_VALUE: f64 = 0.001;

/// Bucket preference when a neighbour lacks the requested one.
const EXTRAPOLATION_BUCKET_ORDER: [WindBucket; 3] = [
    WindBucket::Normal,
    WindBucket::HighWind,
    WindBucket::ExtremeWind,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Regime {
    Mild,
    Cold,
}

/// Whether extrapolated values are scaled by the delta-T ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    DeltaT,
    Unscaled,
}

impl From<bool> for Scaling {
    fn from(apply: bool) -> Self {
        if apply {
            Scaling::DeltaT
        } else {
            Scaling::Unscaled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predictor {
    pub balance_point: f64,
    pub cold_regime_delta: f64,
    pub cold_min_source_delta: f64,
    pub mild_min_source_delta: f64,
}

impl Predictor {
    pub fn new(balance_point: f64) -> Self {
        Self {
            balance_point,
            cold_regime_delta: COLD_REGIME_DELTA_T,
            cold_min_source_delta: COLD_REGIME_MIN_SOURCE_DELTA_T,
            mild_min_source_delta: MIN_EXTRAPOLATION_DELTA_T,
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            balance_point: cfg.balance_point,
            cold_regime_delta: cfg.cold_regime_delta,
            cold_min_source_delta: cfg.cold_regime_min_source_delta,
            mild_min_source_delta: cfg.min_extrapolation_delta,
        }
    }

    pub fn regime(&self, target_temp: f64) -> Regime {
        if (self.balance_point - target_temp).abs() > self.cold_regime_delta {
            Regime::Cold
        } else {
            Regime::Mild
        }
    }

    fn min_source_delta(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Cold => self.cold_min_source_delta,
            Regime::Mild => self.mild_min_source_delta,
        }
    }

    /// Best estimate for `key` at the exact `target_temp`.
    pub fn predict(
        &self,
        map: &BucketMap,
        key: BucketKey,
        target_temp: f64,
        scaling: impl Into<Scaling>,
    ) -> f64 {
        self.predict_at_depth(map, key, target_temp, scaling.into(), 0)
    }

    fn predict_at_depth(
        &self,
        map: &BucketMap,
        key: BucketKey,
        target_temp: f64,
        scaling: Scaling,
        depth: u8,
    ) -> f64 {
        if let Some(value) = map.get(key) {
            return value;
        }

        let delta_target = (self.balance_point - target_temp).abs();
        let regime = self.regime(target_temp);
        debug!(
            temp_key = %key.temp_key,
            wind_bucket = %key.wind_bucket,
            delta_target,
            %regime,
            "Regime-aware prediction"
        );

        if regime == Regime::Mild {
            if let Some(value) = neighbour_average(map, key) {
                return value;
            }
            if let Some(value) = calmer_bucket(map, key) {
                return value;
            }
        }

        let Some(source_key) = nearest_populated_key(map, key.temp_key) else {
            // Only the target key itself (or nothing at all) holds data.
            return map
                .buckets_at(key.temp_key)
                .and_then(|buckets| {
                    resolve_extrapolation_bucket(buckets.keys().copied(), key.wind_bucket)
                        .and_then(|bucket| buckets.get(&bucket).copied())
                })
                .unwrap_or(0.0);
        };

        let Some(source_bucket) = map.buckets_at(source_key).and_then(|buckets| {
            resolve_extrapolation_bucket(buckets.keys().copied(), key.wind_bucket)
        }) else {
            return 0.0;
        };
        let source = BucketKey::new(source_key, source_bucket);

        let neighbour_value = if depth + 1 >= MAX_EXTRAPOLATION_DEPTH {
            map.get(source).unwrap_or(0.0)
        } else {
            self.predict_at_depth(map, source, source_key.as_temperature(), scaling, depth + 1)
        };

        if neighbour_value <= NEGLIGIBLE_NEIGHBOUR_VALUE {
            return 0.0;
        }
        if scaling == Scaling::Unscaled {
            return neighbour_value;
        }

        let delta_source = (self.balance_point - source_key.as_temperature()).abs();
        if delta_source < self.min_source_delta(regime) {
            return neighbour_value;
        }

        round3(neighbour_value * delta_target / delta_source)
    }

    /// Solar coefficient for a unit at a temperature key.
    ///
    /// Exact cell, else same-mode neighbours (average of ±1 when both exist,
    /// otherwise the closest), else the heat-pump default for the mode.
    pub fn unit_solar_coefficient(
        &self,
        coefficients: Option<&SolarMap>,
        temp_key: TempKey,
    ) -> f64 {
        let target_mode = UnitMode::for_temperature(temp_key.as_temperature(), self.balance_point);

        if let Some(coefficients) = coefficients {
            if let Some(value) = coefficients.cell(temp_key).value() {
                return value;
            }

            let same_mode = |k: TempKey| {
                UnitMode::for_temperature(k.as_temperature(), self.balance_point) == target_mode
            };
            let below = coefficients.cell(temp_key.offset(-1)).value();
            let above = coefficients.cell(temp_key.offset(1)).value();
            if let (Some(below), Some(above)) = (below, above) {
                if same_mode(temp_key.offset(-1)) && same_mode(temp_key.offset(1)) {
                    return (below + above) / 2.0;
                }
            }

            let closest = coefficients
                .iter()
                .filter(|(k, _)| same_mode(*k))
                .min_by_key(|(k, _)| k.distance(temp_key));
            if let Some((_, value)) = closest {
                return value;
            }
        }

        match target_mode {
            UnitMode::Cooling => DEFAULT_SOLAR_COEFF_COOLING,
            _ => DEFAULT_SOLAR_COEFF_HEATING,
        }
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

/// Predict with the default regime thresholds.
pub fn predict(
    map: &BucketMap,
    key: BucketKey,
    target_temp: f64,
    balance_point: f64,
    apply_scaling: bool,
) -> f64 {
    Predictor::new(balance_point).predict(map, key, target_temp, apply_scaling)
}

/// First available of `requested → normal → high_wind → extreme_wind`.
pub fn resolve_extrapolation_bucket(
    available: impl IntoIterator<Item = WindBucket>,
    requested: WindBucket,
) -> Option<WindBucket> {
    let available: Vec<WindBucket> = available.into_iter().collect();
    std::iter::once(requested)
        .chain(EXTRAPOLATION_BUCKET_ORDER)
        .find(|bucket| available.contains(bucket))
}

/// True when the exact cell is positive, or a calmer bucket at the same
/// temperature can stand in for it.
pub fn is_model_covered(map: &BucketMap, key: BucketKey) -> bool {
    if map.get(key).is_some_and(|v| v > 0.0) {
        return true;
    }
    key.wind_bucket
        .calmer_fallbacks()
        .iter()
        .any(|bucket| map.contains(BucketKey::new(key.temp_key, *bucket)))
}

fn neighbour_average(map: &BucketMap, key: BucketKey) -> Option<f64> {
    let neighbours: Vec<f64> = [-1, 1]
        .into_iter()
        .filter_map(|offset| map.get(BucketKey::new(key.temp_key.offset(offset), key.wind_bucket)))
        .collect();
    if neighbours.is_empty() {
        None
    } else {
        Some(neighbours.iter().sum::<f64>() / neighbours.len() as f64)
    }
}

fn calmer_bucket(map: &BucketMap, key: BucketKey) -> Option<f64> {
    key.wind_bucket
        .calmer_fallbacks()
        .iter()
        .find_map(|bucket| map.get(BucketKey::new(key.temp_key, *bucket)))
}

/// Nearest populated key other than `target`; ties go to the colder key.
fn nearest_populated_key(map: &BucketMap, target: TempKey) -> Option<TempKey> {
    map.populated_keys()
        .filter(|k| *k != target)
        .min_by_key(|k| k.distance(target))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
