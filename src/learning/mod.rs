//! Hourly learning
//!
//! Turns one completed hour of observations into model updates across all
//! families. The engine is stateless: it borrows the store for the duration
//! of one call and reports what it did in a [`LearningResult`].
//!
//! Order per hour:
//! 1. Gates (no samples, disabled, mixed mode, dual interference).
//! 2. Global track: base when aux is off, aux reduction when it is on.
//!    Frozen during the post-aux cooldown.
//! 3. Per-unit track: solar coefficient, then base or aux reduction on the
//!    solar-normalised actual.

pub mod cooldown;
pub mod gates;
pub mod historical;

pub use cooldown::{AuxCooldown, CooldownExit};
pub use gates::{evaluate_gates, LearningGate};
pub use historical::{HistoricalPoint, ImportOutcome};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::domain::{BucketKey, SolarEffect, TempKey, UnitId, UnitMode};
use crate::model::{
    BucketBuffers, BucketMap, BufferedEma, Cell, EmaStep, ModelStore, SolarBuffers, SolarMap,
};
use crate::predictor::Predictor;
use crate::solar::{normalize_for_learning, unit_solar_impact};

/// Minimum solar factor for a meaningful coefficient observation.
const MIN_SOLAR_FACTOR: f64 = 0.01;

/// Aggregated inputs for one completed hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyObservation {
    pub bucket: BucketKey,
    /// Temperature the predictions are evaluated at.
    pub avg_temp: f64,
    pub total_energy_kwh: f64,
    /// Only units that reported during the hour.
    pub unit_energy_kwh: BTreeMap<UnitId, f64>,
    /// Units missing here are assumed to be heating.
    pub unit_modes: BTreeMap<UnitId, UnitMode>,
    pub solar_factor: f64,
    /// Saturated solar effect on the whole building for the hour.
    pub solar_impact_kwh: f64,
    pub aux_active: bool,
    /// Share of samples with aux on.
    pub aux_fraction: f64,
    pub aux_impact_kwh: f64,
    pub guest_activity: bool,
    pub sample_count: u32,
}

impl HourlyObservation {
    pub fn unit_mode(&self, unit: &str) -> UnitMode {
        self.unit_modes.get(unit).copied().unwrap_or_default()
    }

    pub fn has_guest_activity(&self) -> bool {
        self.guest_activity || self.unit_modes.values().any(|mode| mode.is_guest())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LearningStatus {
    SkippedNoData,
    Disabled,
    SkippedMixedMode,
    SkippedDualInterference,
    CooldownPostAux,
    /// Global base moved by one EMA step.
    Active,
    BaseCollecting,
    BaseJumpStart,
    AuxUpdated,
    AuxCollecting,
    AuxJumpStart,
    AuxSkippedGuestMode,
    AuxSkippedNoBaseModel,
}

impl From<LearningGate> for LearningStatus {
    fn from(gate: LearningGate) -> Self {
        match gate {
            LearningGate::MixedMode => LearningStatus::SkippedMixedMode,
            LearningGate::DualInterference => LearningStatus::SkippedDualInterference,
        }
    }
}

/// What one hour of learning did to the global models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningResult {
    /// The global base cell was written.
    pub model_updated: bool,
    pub model_base_before: f64,
    pub model_base_after: f64,
    pub aux_model_updated: bool,
    pub aux_model_before: Option<f64>,
    pub aux_model_after: Option<f64>,
    pub status: LearningStatus,
}

impl LearningResult {
    fn unchanged(base: f64, status: LearningStatus) -> Self {
        Self {
            model_updated: false,
            model_base_before: base,
            model_base_after: base,
            aux_model_updated: false,
            aux_model_before: None,
            aux_model_after: None,
            status,
        }
    }
}

/// Which family a step belongs to, for logs.
#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum Family {
    GlobalBase,
    GlobalAux,
    UnitBase,
    UnitAux,
    UnitSolar,
}

pub struct LearningEngine {
    cfg: ModelConfig,
    predictor: Predictor,
}

impl LearningEngine {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            predictor: Predictor::from_config(cfg),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    fn global_rule(&self) -> BufferedEma {
        BufferedEma::new(self.cfg.learning_rate, self.cfg.learning_buffer_threshold)
    }

    fn unit_rule(&self) -> BufferedEma {
        BufferedEma::capped(
            self.cfg.learning_rate,
            self.cfg.per_unit_learning_rate_cap,
            self.cfg.learning_buffer_threshold,
        )
    }

    /// Expected base for one unit at the hour's conditions.
    pub fn expected_unit_base(
        &self,
        store: &ModelStore,
        unit: &str,
        obs: &HourlyObservation,
    ) -> f64 {
        store
            .unit_base(unit)
            .map(|map| self.predictor.predict(map, obs.bucket, obs.avg_temp, true))
            .unwrap_or(0.0)
    }

    /// Learn from one completed hour.
    ///
    /// `cooldown_active` is the cooldown state captured before this hour's
    /// exit check, so the hour that converges is still protected.
    pub fn process_hour(
        &self,
        store: &mut ModelStore,
        obs: &HourlyObservation,
        cooldown_active: bool,
    ) -> LearningResult {
        let key = obs.bucket;
        let base_before = self
            .predictor
            .predict(&store.global_base, key, obs.avg_temp, true);

        if obs.sample_count == 0 {
            return LearningResult::unchanged(base_before, LearningStatus::SkippedNoData);
        }
        if !self.cfg.learning_enabled {
            return LearningResult::unchanged(base_before, LearningStatus::Disabled);
        }
        if let Some(gate) = evaluate_gates(
            &self.cfg.gates,
            obs.aux_fraction,
            obs.solar_impact_kwh,
            obs.aux_impact_kwh,
        ) {
            debug!(%gate, bucket = %key, "Learning gated for this hour");
            return LearningResult::unchanged(base_before, gate.into());
        }

        let mut result = if cooldown_active {
            debug!(bucket = %key, "Learning cooldown active: global base model locked");
            LearningResult::unchanged(base_before, LearningStatus::CooldownPostAux)
        } else {
            self.learn_global(store, obs, base_before)
        };

        self.learn_units(store, obs, cooldown_active);

        result.model_base_after = self
            .predictor
            .predict(&store.global_base, key, obs.avg_temp, true);
        result
    }

    fn learn_global(
        &self,
        store: &mut ModelStore,
        obs: &HourlyObservation,
        base_before: f64,
    ) -> LearningResult {
        let key = obs.bucket;
        let global_mode = UnitMode::for_temperature(obs.avg_temp, self.cfg.balance_point);
        let normalized_actual = if self.cfg.solar_enabled {
            normalize_for_learning(obs.total_energy_kwh, obs.solar_impact_kwh, global_mode)
        } else {
            obs.total_energy_kwh
        };

        let mut result = LearningResult::unchanged(base_before, LearningStatus::Active);

        if !obs.aux_active {
            let step = learn_bucket(
                &mut store.global_base,
                &mut store.buffers.global_base,
                key,
                self.global_rule(),
                normalized_actual,
            );
            log_step(Family::GlobalBase, None, &key, &step);
            result.model_updated = step.new_value().is_some();
            result.status = match step {
                EmaStep::Collecting { .. } => LearningStatus::BaseCollecting,
                EmaStep::JumpStarted { .. } => LearningStatus::BaseJumpStart,
                EmaStep::Updated { .. } => LearningStatus::Active,
            };
            return result;
        }

        // Aux on: the global base stays locked, only the reduction learns.
        let current_aux = store.global_aux.cell(key);
        result.aux_model_before = current_aux.value();

        if obs.has_guest_activity() {
            info!(bucket = %key, "Aux learning skipped due to guest mode activity");
            result.aux_model_after = current_aux.value();
            result.status = LearningStatus::AuxSkippedGuestMode;
            return result;
        }

        let base_cell = match store.global_base.get(key) {
            Some(base) if base > self.cfg.energy_guard => base,
            _ => {
                debug!(
                    bucket = %key,
                    "Skipping global aux learning: no base model for this bucket"
                );
                result.aux_model_after = current_aux.value();
                result.status = LearningStatus::AuxSkippedNoBaseModel;
                return result;
            }
        };

        let implied_reduction = (base_cell - normalized_actual).max(0.0);
        let seeded = match current_aux {
            Cell::Value(_) => current_aux,
            Cell::Absent => seed_from_calmer_bucket(&store.global_aux, key),
        };
        if let (Cell::Absent, Cell::Value(seed)) = (current_aux, seeded) {
            debug!(bucket = %key, seed, "Seeding new aux bucket from calmer wind bucket");
            result.aux_model_before = Some(seed);
        }

        let step = match seeded {
            Cell::Value(_) => self.global_rule().step(seeded, &mut Vec::new(), implied_reduction),
            Cell::Absent => self.global_rule().step(
                Cell::Absent,
                store.buffers.global_aux.entry(key),
                implied_reduction,
            ),
        };
        apply_bucket_step(&mut store.global_aux, &mut store.buffers.global_aux, key, &step);
        log_step(Family::GlobalAux, None, &key, &step);

        result.aux_model_updated = step.new_value().is_some();
        result.aux_model_after = store.global_aux.get(key);
        result.status = match step {
            EmaStep::Collecting { .. } => LearningStatus::AuxCollecting,
            EmaStep::JumpStarted { .. } => LearningStatus::AuxJumpStart,
            EmaStep::Updated { .. } => LearningStatus::AuxUpdated,
        };
        result
    }

    fn learn_units(&self, store: &mut ModelStore, obs: &HourlyObservation, cooldown_active: bool) {
        let key = obs.bucket;
        let guest_activity = obs.has_guest_activity();

        for (unit, &actual) in &obs.unit_energy_kwh {
            let mode = obs.unit_mode(unit);
            if !mode.participates_in_learning() {
                continue;
            }
            let affected = self.cfg.affected_units.contains(unit);
            if cooldown_active && affected {
                continue;
            }

            let expected_base = self.expected_unit_base(store, unit, obs);

            if self.cfg.solar_enabled
                && !obs.aux_active
                && obs.solar_factor > MIN_SOLAR_FACTOR
                && expected_base > self.cfg.energy_guard
            {
                self.learn_unit_solar(
                    store,
                    unit,
                    key.temp_key,
                    mode,
                    expected_base,
                    actual,
                    obs.solar_factor,
                );
            }

            let normalized = if self.cfg.solar_enabled {
                let coefficient = self
                    .predictor
                    .unit_solar_coefficient(store.unit_solar(unit), key.temp_key);
                let impact = unit_solar_impact(obs.solar_factor, coefficient);
                normalize_for_learning(actual, impact, mode)
            } else {
                actual
            };

            if obs.aux_active && affected {
                if guest_activity {
                    continue;
                }
                self.learn_unit_aux(store, unit, key, expected_base, normalized);
            } else {
                self.learn_unit_base(store, unit, key, normalized);
            }
        }
    }

    fn learn_unit_base(&self, store: &mut ModelStore, unit: &str, key: BucketKey, normalized: f64) {
        let step = learn_bucket(
            store.unit_base.entry(unit.to_string()).or_default(),
            store.buffers.unit_base.entry(unit.to_string()).or_default(),
            key,
            self.unit_rule(),
            normalized,
        );
        if matches!(step, EmaStep::Updated { .. }) {
            store.observation_counts.increment(unit, key);
        }
        log_step(Family::UnitBase, Some(unit), &key, &step);
    }

    fn learn_unit_aux(
        &self,
        store: &mut ModelStore,
        unit: &str,
        key: BucketKey,
        expected_base: f64,
        normalized: f64,
    ) {
        let base_cell = match store.unit_base(unit).and_then(|map| map.get(key)) {
            Some(base)
                if base > self.cfg.energy_guard && expected_base > self.cfg.energy_guard =>
            {
                base
            }
            _ => {
                debug!(unit, bucket = %key, "Skipping unit aux learning: no base model yet");
                return;
            }
        };

        let implied_reduction = (base_cell - normalized).max(0.0).min(base_cell);
        let step = learn_bucket(
            store.unit_aux.entry(unit.to_string()).or_default(),
            store.buffers.unit_aux.entry(unit.to_string()).or_default(),
            key,
            self.unit_rule().with_upper_bound(base_cell),
            implied_reduction,
        );
        log_step(Family::UnitAux, Some(unit), &key, &step);
    }

    #[allow(clippy::too_many_arguments)]
    fn learn_unit_solar(
        &self,
        store: &mut ModelStore,
        unit: &str,
        temp_key: TempKey,
        mode: UnitMode,
        expected_base: f64,
        actual: f64,
        solar_factor: f64,
    ) {
        let impact = match mode.solar_effect() {
            SolarEffect::Reduces => expected_base - actual,
            SolarEffect::Increases => actual - expected_base,
            SolarEffect::Neutral => return,
        };
        let implied = (impact / solar_factor).clamp(0.0, self.cfg.solar_coeff_cap);

        let step = learn_solar(
            store.unit_solar.entry(unit.to_string()).or_default(),
            store.buffers.unit_solar.entry(unit.to_string()).or_default(),
            temp_key,
            self.unit_rule(),
            implied,
        );
        log_step(Family::UnitSolar, Some(unit), &temp_key, &step);
    }
}

/// One buffered/EMA step on a bucket cell, written back in place.
fn learn_bucket(
    map: &mut BucketMap,
    buffers: &mut BucketBuffers,
    key: BucketKey,
    rule: BufferedEma,
    observation: f64,
) -> EmaStep {
    let step = match map.cell(key) {
        Cell::Absent => rule.step(Cell::Absent, buffers.entry(key), observation),
        present => rule.step(present, &mut Vec::new(), observation),
    };
    apply_bucket_step(map, buffers, key, &step);
    step
}

fn apply_bucket_step(
    map: &mut BucketMap,
    buffers: &mut BucketBuffers,
    key: BucketKey,
    step: &EmaStep,
) {
    if let Some(value) = step.new_value() {
        map.insert(key, value);
    }
    if step.is_jump_start() {
        buffers.discard(key);
    }
}

fn learn_solar(
    map: &mut SolarMap,
    buffers: &mut SolarBuffers,
    temp_key: TempKey,
    rule: BufferedEma,
    observation: f64,
) -> EmaStep {
    let step = match map.cell(temp_key) {
        Cell::Absent => rule.step(Cell::Absent, buffers.entry(temp_key), observation),
        present => rule.step(present, &mut Vec::new(), observation),
    };
    if let Some(value) = step.new_value() {
        map.insert(temp_key, value);
    }
    if step.is_jump_start() {
        buffers.discard(temp_key);
    }
    step
}

/// Nearest less-extreme bucket already learned at the same temperature.
fn seed_from_calmer_bucket(map: &BucketMap, key: BucketKey) -> Cell {
    key.wind_bucket
        .calmer_fallbacks()
        .iter()
        .find_map(|bucket| map.get(BucketKey::new(key.temp_key, *bucket)))
        .into()
}

fn log_step(family: Family, unit: Option<&str>, bucket: &dyn fmt::Display, step: &EmaStep) {
    let unit = unit.unwrap_or("global");
    match *step {
        EmaStep::Collecting { samples, threshold } => debug!(
            %family, unit, %bucket, samples, threshold, "Buffered learning: collecting"
        ),
        EmaStep::JumpStarted { value, samples } => info!(
            %family, unit, %bucket, value, samples, "Buffered learning: jump start"
        ),
        EmaStep::Updated { before, after } => debug!(
            %family, unit, %bucket, before, after, "EMA update"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AffectedUnits, WindBucket};

    const HEATER: &str = "sensor.heater";
    const PUMP: &str = "sensor.heat_pump";

    fn key(t: i32) -> BucketKey {
        BucketKey::new(TempKey(t), WindBucket::Normal)
    }

    fn cfg() -> ModelConfig {
        ModelConfig {
            learning_rate: 0.1,
            solar_enabled: false,
            ..Default::default()
        }
    }

    fn hour(total: f64, units: &[(&str, f64)]) -> HourlyObservation {
        HourlyObservation {
            bucket: key(0),
            avg_temp: 0.0,
            total_energy_kwh: total,
            unit_energy_kwh: units.iter().map(|(u, v)| (u.to_string(), *v)).collect(),
            sample_count: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_samples_skips() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        let mut obs = hour(5.0, &[]);
        obs.sample_count = 0;
        let result = engine.process_hour(&mut store, &obs, false);
        assert_eq!(result.status, LearningStatus::SkippedNoData);
        assert_eq!(store, ModelStore::new());
    }

    #[test]
    fn test_disabled_learns_nothing() {
        let engine = LearningEngine::new(&ModelConfig {
            learning_enabled: false,
            ..cfg()
        });
        let mut store = ModelStore::new();
        let result = engine.process_hour(&mut store, &hour(5.0, &[(HEATER, 5.0)]), false);
        assert_eq!(result.status, LearningStatus::Disabled);
        assert_eq!(store, ModelStore::new());
    }

    #[test]
    fn test_global_cold_start_then_ema() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();

        for (i, total) in [4.0, 5.0, 6.0].into_iter().enumerate() {
            let result = engine.process_hour(&mut store, &hour(total, &[]), false);
            assert_eq!(result.status, LearningStatus::BaseCollecting);
            assert!(!result.model_updated);
            assert_eq!(store.buffers.global_base.samples(key(0)).len(), i + 1);
        }

        let result = engine.process_hour(&mut store, &hour(5.0, &[]), false);
        assert_eq!(result.status, LearningStatus::BaseJumpStart);
        assert!(result.model_updated);
        assert_eq!(store.global_base.get(key(0)), Some(5.0));
        assert!(store.buffers.global_base.is_empty());

        let result = engine.process_hour(&mut store, &hour(6.0, &[]), false);
        assert_eq!(result.status, LearningStatus::Active);
        assert_eq!(result.model_base_before, 5.0);
        assert!((result.model_base_after - 5.1).abs() < 1e-12);
    }

    #[test]
    fn test_global_aux_ema_example() {
        // base 10.0, normalized actual 6.0, aux 2.0, rate 0.1 -> 2.2
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);
        store.global_aux.insert(key(0), 2.0);

        let mut obs = hour(6.0, &[]);
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        let result = engine.process_hour(&mut store, &obs, false);

        assert_eq!(result.status, LearningStatus::AuxUpdated);
        assert!(result.aux_model_updated);
        assert_eq!(result.aux_model_before, Some(2.0));
        let after = result.aux_model_after.unwrap();
        assert!((after - 2.2).abs() < 1e-12);
        // Base stays locked while aux runs
        assert_eq!(store.global_base.get(key(0)), Some(10.0));
        assert!(!result.model_updated);
    }

    #[test]
    fn test_global_aux_requires_exact_base_cell() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        // Neighbour data only: prediction exists but the exact cell does not
        store.global_base.insert(key(1), 10.0);

        let mut obs = hour(6.0, &[]);
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        let result = engine.process_hour(&mut store, &obs, false);
        assert_eq!(result.status, LearningStatus::AuxSkippedNoBaseModel);
        assert!(store.global_aux.is_empty());
        assert!(store.buffers.global_aux.is_empty());
    }

    #[test]
    fn test_new_aux_wind_bucket_seeded_from_calmer_bucket() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        let windy = BucketKey::new(TempKey(0), WindBucket::HighWind);
        store.global_base.insert(windy, 12.0);
        store.global_aux.insert(key(0), 3.0);

        let mut obs = hour(7.0, &[]);
        obs.bucket = windy;
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        let result = engine.process_hour(&mut store, &obs, false);

        // seed 3.0 + 0.1 * (5.0 - 3.0) = 3.2
        assert_eq!(result.status, LearningStatus::AuxUpdated);
        assert_eq!(result.aux_model_before, Some(3.0));
        assert!((store.global_aux.get(windy).unwrap() - 3.2).abs() < 1e-12);
    }

    #[test]
    fn test_global_aux_without_seed_buffers() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);

        let mut obs = hour(7.0, &[]);
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        let result = engine.process_hour(&mut store, &obs, false);
        assert_eq!(result.status, LearningStatus::AuxCollecting);
        assert_eq!(result.aux_model_after, None);
        assert_eq!(store.buffers.global_aux.samples(key(0)), &[3.0]);
    }

    #[test]
    fn test_guest_activity_skips_aux_but_not_base_for_excluded_units() {
        let engine = LearningEngine::new(&ModelConfig {
            affected_units: AffectedUnits::only([HEATER]),
            ..cfg()
        });
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);
        store.unit_base.entry(PUMP.into()).or_default().insert(key(0), 4.0);
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 6.0);

        let mut obs = hour(6.0, &[(HEATER, 3.0), (PUMP, 5.0)]);
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        obs.guest_activity = true;
        let result = engine.process_hour(&mut store, &obs, false);

        assert_eq!(result.status, LearningStatus::AuxSkippedGuestMode);
        assert!(store.unit_aux(HEATER).is_none());
        // Excluded unit keeps learning base: 4.0 + 0.03 * (5.0 - 4.0)
        let pump = store.unit_base(PUMP).unwrap().get(key(0)).unwrap();
        assert!((pump - 4.03).abs() < 1e-12);
        assert_eq!(store.observation_counts.get(PUMP, key(0)), 1);
    }

    #[test]
    fn test_unit_aux_clamped_to_unit_base() {
        let engine = LearningEngine::new(&ModelConfig {
            learning_buffer_threshold: 1,
            ..cfg()
        });
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 2.0);

        let mut obs = hour(6.0, &[(HEATER, 0.0)]);
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        engine.process_hour(&mut store, &obs, false);

        assert_eq!(store.unit_aux(HEATER).unwrap().get(key(0)), Some(2.0));
    }

    #[test]
    fn test_cooldown_freezes_global_and_affected_units() {
        let engine = LearningEngine::new(&ModelConfig {
            affected_units: AffectedUnits::only([HEATER]),
            ..cfg()
        });
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 6.0);
        store.unit_base.entry(PUMP.into()).or_default().insert(key(0), 4.0);

        let obs = hour(7.0, &[(HEATER, 2.0), (PUMP, 5.0)]);
        let result = engine.process_hour(&mut store, &obs, true);

        assert_eq!(result.status, LearningStatus::CooldownPostAux);
        assert!(!result.model_updated);
        assert_eq!(store.global_base.get(key(0)), Some(10.0));
        assert_eq!(store.unit_base(HEATER).unwrap().get(key(0)), Some(6.0));
        assert!(store.unit_base(PUMP).unwrap().get(key(0)).unwrap() > 4.0);
    }

    #[test]
    fn test_mixed_mode_hour_is_gated() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        let mut obs = hour(5.0, &[(HEATER, 5.0)]);
        obs.aux_fraction = 0.5;
        let result = engine.process_hour(&mut store, &obs, false);
        assert_eq!(result.status, LearningStatus::SkippedMixedMode);
        assert_eq!(store, ModelStore::new());
    }

    #[test]
    fn test_off_and_guest_units_do_not_learn() {
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        let mut obs = hour(5.0, &[(HEATER, 5.0), (PUMP, 3.0)]);
        obs.unit_modes.insert(HEATER.into(), UnitMode::Off);
        obs.unit_modes.insert(PUMP.into(), UnitMode::GuestHeating);
        engine.process_hour(&mut store, &obs, false);
        assert!(store.buffers.unit_base.is_empty());
        assert!(store.unit_base.is_empty());
    }

    #[test]
    fn test_unit_solar_coefficient_learned_in_sun() {
        let engine = LearningEngine::new(&ModelConfig {
            learning_rate: 0.1,
            learning_buffer_threshold: 1,
            ..Default::default()
        });
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 3.0);

        let mut obs = hour(2.0, &[(HEATER, 2.0)]);
        obs.solar_factor = 0.5;
        engine.process_hour(&mut store, &obs, false);

        // (3.0 - 2.0) / 0.5 = 2.0, jump-started with a buffer of one
        let coeff = store.unit_solar(HEATER).unwrap().cell(TempKey(0));
        assert_eq!(coeff, Cell::Value(2.0));
    }

    #[test]
    fn test_solar_observation_capped() {
        let engine = LearningEngine::new(&ModelConfig {
            learning_buffer_threshold: 1,
            ..Default::default()
        });
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 10.0);

        let mut obs = hour(0.0, &[(HEATER, 0.0)]);
        obs.solar_factor = 0.5;
        engine.process_hour(&mut store, &obs, false);

        let coeff = store.unit_solar(HEATER).unwrap().cell(TempKey(0));
        assert_eq!(coeff, Cell::Value(5.0));
    }

    fn solar_engine() -> LearningEngine {
        LearningEngine::new(&ModelConfig {
            learning_buffer_threshold: 1,
            ..Default::default()
        })
    }

    fn assert_no_solar_learned(store: &ModelStore) {
        assert!(store.unit_solar(HEATER).is_none());
        assert!(store.buffers.unit_solar.values().all(|b| b.samples(TempKey(0)).is_empty()));
    }

    #[test]
    fn test_solar_not_learned_in_weak_sun() {
        let engine = solar_engine();
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 3.0);

        let mut obs = hour(2.0, &[(HEATER, 2.0)]);
        obs.solar_factor = 0.01;
        engine.process_hour(&mut store, &obs, false);

        assert_no_solar_learned(&store);
    }

    #[test]
    fn test_solar_not_learned_while_aux_runs() {
        let engine = solar_engine();
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 3.0);

        let mut obs = hour(2.0, &[(HEATER, 2.0)]);
        obs.solar_factor = 0.8;
        obs.aux_active = true;
        obs.aux_fraction = 1.0;
        engine.process_hour(&mut store, &obs, false);

        assert_no_solar_learned(&store);
    }

    #[test]
    fn test_solar_not_learned_without_expected_base() {
        let engine = solar_engine();
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 0.01);

        let mut obs = hour(0.0, &[(HEATER, 0.0)]);
        obs.solar_factor = 0.8;
        engine.process_hour(&mut store, &obs, false);

        assert_no_solar_learned(&store);
    }

    #[test]
    fn test_cooling_solar_observation_sign() {
        let engine = solar_engine();
        let mut store = ModelStore::new();
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 2.0);

        let mut obs = hour(3.0, &[(HEATER, 3.0)]);
        obs.unit_modes.insert(HEATER.into(), UnitMode::Cooling);
        obs.solar_factor = 0.5;
        engine.process_hour(&mut store, &obs, false);

        // Sun adds load when cooling: (3.0 - 2.0) / 0.5
        let coeff = store.unit_solar(HEATER).unwrap().cell(TempKey(0));
        assert_eq!(coeff, Cell::Value(2.0));
    }

    #[test]
    fn test_unit_aux_buffers_then_capped_ema_within_base() {
        // learning_rate 0.1 is capped to 0.03 for units; default buffer of 4
        let engine = LearningEngine::new(&cfg());
        let mut store = ModelStore::new();
        store.global_base.insert(key(0), 10.0);
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 2.0);

        let aux_hour = |actual: f64| {
            let mut obs = hour(actual, &[(HEATER, actual)]);
            obs.aux_active = true;
            obs.aux_fraction = 1.0;
            obs
        };
        let buffered = |store: &ModelStore| {
            store
                .buffers
                .unit_aux
                .get(HEATER)
                .map_or(0, |b| b.samples(key(0)).len())
        };

        for i in 1..=3 {
            engine.process_hour(&mut store, &aux_hour(0.5), false);
            assert_eq!(buffered(&store), i);
            assert!(store.unit_aux(HEATER).and_then(|m| m.get(key(0))).is_none());
        }

        // Fourth sample jump-starts at the mean implied reduction
        engine.process_hour(&mut store, &aux_hour(0.5), false);
        assert_eq!(store.unit_aux(HEATER).unwrap().get(key(0)), Some(1.5));
        assert_eq!(buffered(&store), 0);

        // 1.5 + 0.03 * (2.0 - 1.5)
        engine.process_hour(&mut store, &aux_hour(0.0), false);
        let aux = store.unit_aux(HEATER).unwrap().get(key(0)).unwrap();
        assert!((aux - 1.515).abs() < 1e-12);

        // A smaller base caps the reduction at the base cell
        store.unit_base.entry(HEATER.into()).or_default().insert(key(0), 1.0);
        engine.process_hour(&mut store, &aux_hour(0.0), false);
        assert_eq!(store.unit_aux(HEATER).unwrap().get(key(0)), Some(1.0));
    }
}
