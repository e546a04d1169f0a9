//! Solar sign convention and saturation.
//!
//! Heating: sun reduces demand, limited by what is left to reduce.
//! Cooling: sun adds demand, never saturates.

use serde::{Deserialize, Serialize};

use crate::domain::{SolarEffect, UnitMode};

/// Result of applying a solar potential to a unit's remaining demand.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolarSaturation {
    pub applied: f64,
    pub wasted: f64,
    pub net: f64,
}

/// Apply `potential` kWh of solar to `net_demand` for a unit in `mode`.
pub fn saturation(net_demand: f64, potential: f64, mode: UnitMode) -> SolarSaturation {
    match mode.solar_effect() {
        SolarEffect::Reduces => {
            let limit = net_demand.max(0.0);
            let applied = potential.min(limit);
            SolarSaturation {
                applied,
                wasted: potential - applied,
                net: (net_demand - applied).max(0.0),
            }
        }
        SolarEffect::Increases => SolarSaturation {
            applied: potential,
            wasted: 0.0,
            net: net_demand + potential,
        },
        SolarEffect::Neutral => SolarSaturation {
            applied: 0.0,
            wasted: 0.0,
            net: net_demand,
        },
    }
}

/// Remove the solar effect from a measured value ("dark" equivalent).
pub fn normalize_for_learning(actual_kwh: f64, solar_impact: f64, mode: UnitMode) -> f64 {
    let normalized = match mode.solar_effect() {
        SolarEffect::Reduces => actual_kwh + solar_impact,
        SolarEffect::Increases => actual_kwh - solar_impact,
        SolarEffect::Neutral => actual_kwh,
    };
    normalized.max(0.0)
}

/// kWh of solar impact for a unit: `factor * coefficient`.
pub fn unit_solar_impact(solar_factor: f64, coefficient: f64) -> f64 {
    solar_factor * coefficient
}
