//! Weather input conditioning
//!
//! Helpers that turn raw collaborator readings into the two numbers the
//! classifier needs: an inertia-weighted outdoor temperature and an effective
//! wind speed in m/s.

use serde::{Deserialize, Serialize};

const MS_TO_KMH: f64 = 3.6;
const MS_TO_KNOTS: f64 = 1.94384;

/// Unit a wind sensor reports in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum WindUnit {
    #[default]
    #[serde(rename = "m/s")]
    #[strum(serialize = "m/s")]
    MetersPerSecond,
    #[serde(rename = "km/h")]
    #[strum(serialize = "km/h")]
    KilometersPerHour,
    #[serde(rename = "knots")]
    #[strum(serialize = "knots")]
    Knots,
}

impl WindUnit {
    pub fn to_ms(self, value: f64) -> f64 {
        match self {
            WindUnit::MetersPerSecond => value,
            WindUnit::KilometersPerHour => value / MS_TO_KMH,
            WindUnit::Knots => value / MS_TO_KNOTS,
        }
    }

    pub fn from_ms(self, value_ms: f64) -> f64 {
        match self {
            WindUnit::MetersPerSecond => value_ms,
            WindUnit::KilometersPerHour => value_ms * MS_TO_KMH,
            WindUnit::Knots => value_ms * MS_TO_KNOTS,
        }
    }
}

/// Effective wind: sustained speed plus a weighted share of gust turbulence.
///
/// `speed + max(0, gust - speed) * gust_factor`, with negative readings
/// treated as calm.
pub fn effective_wind(speed: f64, gust: Option<f64>, gust_factor: f64) -> f64 {
    let speed = speed.max(0.0);
    match gust {
        None => speed,
        Some(gust) => {
            let turbulence = (gust.max(0.0) - speed).max(0.0);
            speed + turbulence * gust_factor
        }
    }
}

/// How much of the recent temperature history the building "remembers".
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InertiaProfile {
    /// Two hours, highly responsive.
    Fast,
    /// Four hours, a typical house.
    #[default]
    Normal,
    /// Twelve hours, passive house or heavy concrete.
    Slow,
}

impl InertiaProfile {
    /// Weights ordered oldest to newest.
    pub fn weights(self) -> &'static [f64] {
        match self {
            InertiaProfile::Fast => &[0.50, 0.50],
            InertiaProfile::Normal => &[0.20, 0.30, 0.30, 0.20],
            InertiaProfile::Slow => &[
                0.05, 0.05, 0.06, 0.08, 0.10, 0.12, 0.12, 0.12, 0.10, 0.08, 0.06, 0.06,
            ],
        }
    }

    /// Hours of history needed beyond the current reading.
    pub fn hours_back(self) -> usize {
        self.weights().len() - 1
    }
}

/// Weighted inertia temperature.
///
/// `temps` is ordered oldest to newest. The newest temperature is matched to
/// the newest weight and the weights are renormalised over the samples that
/// are actually available.
pub fn weighted_inertia(temps: &[f64], weights: &[f64]) -> f64 {
    if temps.is_empty() || weights.is_empty() {
        return 0.0;
    }

    let count = temps.len().min(weights.len());
    let active_temps = &temps[temps.len() - count..];
    let active_weights = &weights[weights.len() - count..];

    let total_weight: f64 = active_weights.iter().sum();
    if total_weight == 0.0 {
        return active_temps.iter().sum::<f64>() / count as f64;
    }

    active_temps
        .iter()
        .zip(active_weights)
        .map(|(t, w)| t * w)
        .sum::<f64>()
        / total_weight
}
