//! Training the global models from imported history.
//!
//! Imported points come from a meter history rather than a live hour, so
//! there is no buffering: the first point seeds the cell directly and later
//! points move it by one EMA step.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LearningEngine;
use crate::domain::BucketKey;
use crate::model::ModelStore;

/// One historical hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub bucket: BucketKey,
    pub temp: f64,
    pub actual_kwh: f64,
    pub aux_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImportOutcome {
    UpdatedBaseModel,
    UpdatedAuxModel,
    SkippedNoBaseModel,
}

impl LearningEngine {
    pub fn learn_from_historical(
        &self,
        store: &mut ModelStore,
        point: &HistoricalPoint,
    ) -> ImportOutcome {
        let rate = self.config().learning_rate;
        let key = point.bucket;

        if point.aux_active {
            let base = self
                .predictor
                .predict(&store.global_base, key, point.temp, true);
            if base <= self.config().energy_guard {
                debug!(bucket = %key, "Historical aux point skipped: no base model");
                return ImportOutcome::SkippedNoBaseModel;
            }

            let implied = (base - point.actual_kwh).max(0.0);
            let current = store.global_aux.get(key).unwrap_or(0.0);
            store.global_aux.insert(key, seed_or_ema(current, implied, rate));
            return ImportOutcome::UpdatedAuxModel;
        }

        let current = store.global_base.get(key).unwrap_or(0.0);
        store
            .global_base
            .insert(key, seed_or_ema(current, point.actual_kwh.max(0.0), rate));
        ImportOutcome::UpdatedBaseModel
    }
}

/// A zero cell takes the observation as-is.
fn seed_or_ema(current: f64, observation: f64, rate: f64) -> f64 {
    if current == 0.0 {
        observation
    } else {
        (current + rate * (observation - current)).max(0.0)
    }
}
