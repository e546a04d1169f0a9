use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Identifier of a heating/cooling unit (typically its energy meter entity).
pub type UnitId = String;

// ============================================================================
// Bucket Keys
// ============================================================================

/// Integer-degree temperature label used as the first level of every model map.
///
/// Persisted as its decimal string (`"-3"`, `"12"`) so stored maps stay
/// readable by collaborators that only know string keys.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct TempKey(pub i32);

impl TempKey {
    /// Nearest-integer rounding, halves to the even neighbour.
    pub fn from_temperature(temp_c: f64) -> Self {
        Self(temp_c.round_ties_even() as i32)
    }

    pub fn degrees(self) -> i32 {
        self.0
    }

    /// The key as a temperature, used when a neighbour becomes the target.
    pub fn as_temperature(self) -> f64 {
        self.0 as f64
    }

    pub fn offset(self, delta: i32) -> Self {
        Self(self.0 + delta)
    }

    pub fn distance(self, other: TempKey) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for TempKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TempKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .map(TempKey)
            .map_err(|_| ModelError::InvalidBucketLabel(s.to_string()))
    }
}

impl From<TempKey> for String {
    fn from(key: TempKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for TempKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Wind classification of an hour. Ordered from calm to stormy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WindBucket {
    #[default]
    Normal,
    HighWind,
    ExtremeWind,
}

impl WindBucket {
    /// Less-extreme buckets at the same temperature, nearest first.
    ///
    /// Used for same-key wind fallback and for seeding new auxiliary buckets.
    /// `Normal` never falls back upwards to a windier bucket.
    pub fn calmer_fallbacks(self) -> &'static [WindBucket] {
        match self {
            WindBucket::ExtremeWind => &[WindBucket::HighWind, WindBucket::Normal],
            WindBucket::HighWind => &[WindBucket::Normal],
            WindBucket::Normal => &[],
        }
    }
}

/// Full model key: integer temperature plus wind bucket.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BucketKey {
    pub temp_key: TempKey,
    pub wind_bucket: WindBucket,
}

impl BucketKey {
    pub fn new(temp_key: TempKey, wind_bucket: WindBucket) -> Self {
        Self {
            temp_key,
            wind_bucket,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T={} W={}", self.temp_key, self.wind_bucket)
    }
}

// ============================================================================
// Unit State
// ============================================================================

/// Operating mode of a single unit, set externally.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitMode {
    #[default]
    Heating,
    Cooling,
    Off,
    GuestHeating,
    GuestCooling,
}

/// How solar gain acts on a unit's demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarEffect {
    /// Sun reduces demand (heating).
    Reduces,
    /// Sun increases demand (cooling).
    Increases,
    /// No correction.
    Neutral,
}

impl UnitMode {
    /// Only plain heating and cooling feed the models. Guest consumption is noise.
    pub fn participates_in_learning(self) -> bool {
        matches!(self, UnitMode::Heating | UnitMode::Cooling)
    }

    pub fn is_guest(self) -> bool {
        matches!(self, UnitMode::GuestHeating | UnitMode::GuestCooling)
    }

    pub fn solar_effect(self) -> SolarEffect {
        match self {
            UnitMode::Heating | UnitMode::GuestHeating => SolarEffect::Reduces,
            UnitMode::Cooling | UnitMode::GuestCooling => SolarEffect::Increases,
            UnitMode::Off => SolarEffect::Neutral,
        }
    }

    /// Mode implied by a temperature relative to the balance point.
    pub fn for_temperature(temp_c: f64, balance_point: f64) -> Self {
        if temp_c < balance_point {
            UnitMode::Heating
        } else {
            UnitMode::Cooling
        }
    }
}

/// Units influenced by the auxiliary heat source.
///
/// `None` means every unit is affected; an explicit empty set means none is,
/// in which case the whole global auxiliary effect stays unattributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffectedUnits(Option<BTreeSet<UnitId>>);

impl AffectedUnits {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn none() -> Self {
        Self(Some(BTreeSet::new()))
    }

    pub fn only<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        Self(Some(units.into_iter().map(Into::into).collect()))
    }

    pub fn contains(&self, unit: &str) -> bool {
        match &self.0 {
            None => true,
            Some(set) => set.contains(unit),
        }
    }

    pub fn is_all(&self) -> bool {
        self.0.is_none()
    }

    /// Explicitly configured members, if the set is not "all".
    pub fn members(&self) -> Option<&BTreeSet<UnitId>> {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_temp_key_rounding() {
        assert_eq!(TempKey::from_temperature(5.4), TempKey(5));
        assert_eq!(TempKey::from_temperature(5.6), TempKey(6));
        assert_eq!(TempKey::from_temperature(-1.5), TempKey(-2));
        assert_eq!(TempKey::from_temperature(-0.4), TempKey(0));
    }

    #[test]
    fn test_temp_key_halves_go_to_even() {
        let keys: Vec<i32> = [2.5, -0.5, 0.5, -2.5, 3.5, -3.5]
            .iter()
            .map(|&t| TempKey::from_temperature(t).degrees())
            .collect();
        assert_eq!(keys, vec![2, 0, 0, -2, 4, -4]);
    }

    #[test]
    fn test_temp_key_string_roundtrip_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(TempKey(-3), 1.5);
        map.insert(TempKey(12), 2.0);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"-3":1.5,"12":2.0}"#);

        let back: BTreeMap<TempKey, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_temp_key_rejects_garbage() {
        assert!("warm".parse::<TempKey>().is_err());
        assert_eq!(" 7 ".parse::<TempKey>().unwrap(), TempKey(7));
    }

    #[test]
    fn test_wind_bucket_labels() {
        assert_eq!(WindBucket::HighWind.to_string(), "high_wind");
        assert_eq!("extreme_wind".parse::<WindBucket>().unwrap(), WindBucket::ExtremeWind);
        assert_eq!(
            serde_json::to_string(&WindBucket::Normal).unwrap(),
            "\"normal\""
        );
    }

    #[test]
    fn test_calmer_fallbacks_never_go_upwards() {
        assert!(WindBucket::Normal.calmer_fallbacks().is_empty());
        assert_eq!(WindBucket::HighWind.calmer_fallbacks(), &[WindBucket::Normal]);
        assert_eq!(
            WindBucket::ExtremeWind.calmer_fallbacks(),
            &[WindBucket::HighWind, WindBucket::Normal]
        );
    }

    #[test]
    fn test_unit_mode_learning_participation() {
        assert!(UnitMode::Heating.participates_in_learning());
        assert!(UnitMode::Cooling.participates_in_learning());
        assert!(!UnitMode::Off.participates_in_learning());
        assert!(!UnitMode::GuestHeating.participates_in_learning());
        assert!(UnitMode::GuestCooling.is_guest());
        assert_eq!("guest_heating".parse::<UnitMode>().unwrap(), UnitMode::GuestHeating);
    }

    #[test]
    fn test_affected_units_semantics() {
        let all = AffectedUnits::all();
        assert!(all.contains("sensor.anything"));

        let none = AffectedUnits::none();
        assert!(!none.contains("sensor.heater"));

        let some = AffectedUnits::only(["sensor.heater"]);
        assert!(some.contains("sensor.heater"));
        assert!(!some.contains("sensor.other"));

        assert_eq!(serde_json::to_string(&all).unwrap(), "null");
        assert_eq!(serde_json::to_string(&none).unwrap(), "[]");
    }
}
