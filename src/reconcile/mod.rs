//! Reconciliation Engine
//!
//! Two tracks describe the same hour:
//! - the **global** track (whole-building models) is the truth for the total;
//! - the **per-unit** track is the truth for how the total splits up.
//!
//! They are never forced to agree. Per-unit values are clamped so no unit
//! is reduced below zero, but never rescaled; whatever the units cannot
//! explain is reported explicitly (`orphaned_aux_savings`, `unspecified_kwh`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ModelConfig;
use crate::domain::{AffectedUnits, BucketKey, SolarEffect, UnitId, UnitMode};
use crate::model::{BucketClassifier, ModelStore};
use crate::predictor::Predictor;
use crate::solar::{saturation, unit_solar_impact};

/// Gaps at or below this are rounding noise, not orphaned savings.
const ORPHAN_EPSILON: f64 = 0.001;

/// Conditions to reconcile for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
    /// Inertia-weighted outdoor temperature.
    pub temp: f64,
    /// Effective wind speed in m/s.
    pub effective_wind: f64,
    pub solar_factor: f64,
    pub aux_active: bool,
    /// Every tracked unit with its current mode.
    pub units: BTreeMap<UnitId, UnitMode>,
    /// Measured aux effect; overrides the model and forces the aux path when positive.
    pub known_aux_impact_kwh: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitBreakdown {
    pub net_kwh: f64,
    pub base_kwh: f64,
    /// Applied reduction, never above `base_kwh`.
    pub aux_reduction_kwh: f64,
    pub raw_aux_kwh: f64,
    pub overflow_kwh: f64,
    pub clamped: bool,
    pub solar_reduction_kwh: f64,
    pub raw_solar_kwh: f64,
    pub solar_wasted_kwh: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub base_kwh: f64,
    pub aux_reduction_kwh: f64,
    pub solar_reduction_kwh: f64,
    pub solar_wasted_kwh: f64,
    pub unassigned_aux_savings: f64,
    pub orphaned_aux_savings: f64,
    pub unspecified_kwh: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub total_kwh: f64,
    pub global_base_kwh: f64,
    pub global_aux_reduction_kwh: f64,
    pub breakdown: Breakdown,
    pub unit_breakdown: BTreeMap<UnitId, UnitBreakdown>,
}

impl Reconciliation {
    pub fn unit_sum_net(&self) -> f64 {
        self.unit_breakdown.values().map(|u| u.net_kwh).sum()
    }
}

pub struct ReconciliationEngine {
    predictor: Predictor,
    classifier: BucketClassifier,
    affected_units: AffectedUnits,
    solar_enabled: bool,
}

impl ReconciliationEngine {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            predictor: Predictor::from_config(cfg),
            classifier: BucketClassifier::from_config(cfg),
            affected_units: cfg.affected_units.clone(),
            solar_enabled: cfg.solar_enabled,
        }
    }

    pub fn bucket_for(&self, conditions: &Conditions) -> BucketKey {
        self.classifier
            .classify(conditions.temp, conditions.effective_wind)
    }

    pub fn reconcile(&self, store: &ModelStore, conditions: &Conditions) -> Reconciliation {
        let key = self.bucket_for(conditions);
        let temp = conditions.temp;

        // Global track
        let global_base = self.predictor.predict(&store.global_base, key, temp, true);
        let (global_aux, aux_active) = match conditions.known_aux_impact_kwh {
            Some(known) => (known, conditions.aux_active || known > 0.0),
            None if conditions.aux_active => (
                self.predictor.predict(&store.global_aux, key, temp, true),
                true,
            ),
            None => (0.0, false),
        };

        // Per-unit track
        let mut breakdown = Breakdown::default();
        let mut unit_breakdown = BTreeMap::new();
        let (mut applied_heating, mut applied_cooling) = (0.0, 0.0);
        let mut overflow_sum = 0.0;

        for (unit, &mode) in &conditions.units {
            let base = store
                .unit_base(unit)
                .map(|map| self.predictor.predict(map, key, temp, true))
                .unwrap_or(0.0);

            let affected = aux_active && self.affected_units.contains(unit);
            let raw_aux = if affected {
                store
                    .unit_aux(unit)
                    .map(|map| self.predictor.predict(map, key, temp, true))
                    .unwrap_or(0.0)
            } else {
                0.0
            };

            let raw_solar = if self.solar_enabled {
                let coefficient = self
                    .predictor
                    .unit_solar_coefficient(store.unit_solar(unit), key.temp_key);
                unit_solar_impact(conditions.solar_factor, coefficient)
            } else {
                0.0
            };

            let applied_aux = raw_aux.min(base);
            let overflow = raw_aux - applied_aux;
            let solar = saturation(base - applied_aux, raw_solar, mode);

            match mode.solar_effect() {
                SolarEffect::Increases => applied_cooling += solar.applied,
                _ => applied_heating += solar.applied,
            }
            overflow_sum += overflow;

            breakdown.base_kwh += base;
            breakdown.aux_reduction_kwh += applied_aux;
            breakdown.solar_reduction_kwh += solar.applied;
            breakdown.solar_wasted_kwh += solar.wasted;

            unit_breakdown.insert(
                unit.clone(),
                UnitBreakdown {
                    net_kwh: solar.net,
                    base_kwh: base,
                    aux_reduction_kwh: applied_aux,
                    raw_aux_kwh: raw_aux,
                    overflow_kwh: overflow,
                    clamped: overflow > ORPHAN_EPSILON,
                    solar_reduction_kwh: solar.applied,
                    raw_solar_kwh: raw_solar,
                    solar_wasted_kwh: solar.wasted,
                },
            );
        }

        // Kelvin protocol: surface what the units do not account for
        breakdown.unassigned_aux_savings = overflow_sum;
        if aux_active && global_aux > 0.0 {
            let remaining = global_aux - breakdown.aux_reduction_kwh - overflow_sum;
            if remaining > ORPHAN_EPSILON {
                breakdown.orphaned_aux_savings = remaining;
                breakdown.unassigned_aux_savings += remaining;
            }
        }

        let global_solar_effect = applied_cooling - applied_heating;
        let total = ((global_base - global_aux).max(0.0) + global_solar_effect).max(0.0);
        let unit_sum_net: f64 = unit_breakdown.values().map(|u: &UnitBreakdown| u.net_kwh).sum();
        breakdown.unspecified_kwh = total - unit_sum_net;

        debug!(
            bucket = %key,
            total,
            global_base,
            global_aux,
            unit_sum_net,
            orphaned = breakdown.orphaned_aux_savings,
            unspecified = breakdown.unspecified_kwh,
            "Reconciled demand"
        );

        Reconciliation {
            total_kwh: total,
            global_base_kwh: global_base,
            global_aux_reduction_kwh: global_aux,
            breakdown,
            unit_breakdown,
        }
    }
}
