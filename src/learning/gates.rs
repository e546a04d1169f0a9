use serde::{Deserialize, Serialize};

use crate::config::LearningGateConfig;

/// Hour-level reasons to learn nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LearningGate {
    /// Aux ran for part of the hour only; neither model fits.
    MixedMode,
    /// Solar and aux both moved consumption; the deviation cannot be attributed.
    DualInterference,
}

/// First gate that closes for an hour, if any.
pub fn evaluate_gates(
    cfg: &LearningGateConfig,
    aux_fraction: f64,
    solar_impact_kwh: f64,
    aux_impact_kwh: f64,
) -> Option<LearningGate> {
    if cfg.mixed_mode_low < aux_fraction && aux_fraction < cfg.mixed_mode_high {
        return Some(LearningGate::MixedMode);
    }
    if solar_impact_kwh > cfg.dual_interference_threshold
        && aux_impact_kwh > cfg.dual_interference_threshold
    {
        return Some(LearningGate::DualInterference);
    }
    None
}
