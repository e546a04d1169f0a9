use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::{Validate, ValidationError};

use crate::domain::{AffectedUnits, InertiaProfile, WindUnit};
use crate::error::{ModelError, ModelResult};
use crate::simulation::BuildingConfig;

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;
pub const DEFAULT_BALANCE_POINT: f64 = 17.0;
pub const DEFAULT_WIND_THRESHOLD: f64 = 5.5;
pub const DEFAULT_EXTREME_WIND_THRESHOLD: f64 = 10.8;
pub const DEFAULT_WIND_GUST_FACTOR: f64 = 0.6;

/// 3% max EMA rate for per-unit models.
pub const PER_UNIT_LEARNING_RATE_CAP: f64 = 0.03;
/// Max solar coefficient (kW per full sun).
pub const SOLAR_COEFF_CAP: f64 = 5.0;
pub const LEARNING_BUFFER_THRESHOLD: usize = 4;
/// 10 Wh guard against dividing by (or learning against) nothing.
pub const ENERGY_GUARD_THRESHOLD: f64 = 0.01;
/// Minimum source delta-T (degrees) to trust an extrapolation in the mild regime.
pub const MIN_EXTRAPOLATION_DELTA_T: f64 = 0.5;
pub const COLD_REGIME_DELTA_T: f64 = 4.0;
pub const COLD_REGIME_MIN_SOURCE_DELTA_T: f64 = 1.0;

/// Solar coefficients tuned for heat pumps (COP ~2.3-2.5).
pub const DEFAULT_SOLAR_COEFF_HEATING: f64 = 0.15;
pub const DEFAULT_SOLAR_COEFF_COOLING: f64 = 0.17;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub controller: ControllerConfig,
    pub simulation: BuildingConfig,
}

/// Every numeric knob of the demand model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_model_config"))]
#[serde(default)]
pub struct ModelConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = -30.0, max = 40.0))]
    pub balance_point: f64,
    #[validate(range(min = 0.0))]
    pub wind_threshold: f64,
    #[validate(range(min = 0.0))]
    pub extreme_wind_threshold: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub per_unit_learning_rate_cap: f64,
    #[validate(range(min = 0.0))]
    pub solar_coeff_cap: f64,
    #[validate(range(min = 1, max = 96))]
    pub learning_buffer_threshold: usize,
    #[validate(range(min = 0.0))]
    pub energy_guard: f64,
    #[validate(range(min = 0.0))]
    pub min_extrapolation_delta: f64,
    #[validate(range(min = 0.0))]
    pub cold_regime_delta: f64,
    #[validate(range(min = 0.0))]
    pub cold_regime_min_source_delta: f64,
    /// Master switch; when off every hour reports `disabled`.
    pub learning_enabled: bool,
    pub solar_enabled: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub wind_gust_factor: f64,
    pub wind_unit: WindUnit,
    pub inertia_profile: InertiaProfile,
    pub affected_units: AffectedUnits,
    #[validate(nested)]
    pub cooldown: CooldownConfig,
    #[validate(nested)]
    pub gates: LearningGateConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            balance_point: DEFAULT_BALANCE_POINT,
            wind_threshold: DEFAULT_WIND_THRESHOLD,
            extreme_wind_threshold: DEFAULT_EXTREME_WIND_THRESHOLD,
            per_unit_learning_rate_cap: PER_UNIT_LEARNING_RATE_CAP,
            solar_coeff_cap: SOLAR_COEFF_CAP,
            learning_buffer_threshold: LEARNING_BUFFER_THRESHOLD,
            energy_guard: ENERGY_GUARD_THRESHOLD,
            min_extrapolation_delta: MIN_EXTRAPOLATION_DELTA_T,
            cold_regime_delta: COLD_REGIME_DELTA_T,
            cold_regime_min_source_delta: COLD_REGIME_MIN_SOURCE_DELTA_T,
            learning_enabled: true,
            solar_enabled: true,
            wind_gust_factor: DEFAULT_WIND_GUST_FACTOR,
            wind_unit: WindUnit::default(),
            inertia_profile: InertiaProfile::default(),
            affected_units: AffectedUnits::all(),
            cooldown: CooldownConfig::default(),
            gates: LearningGateConfig::default(),
        }
    }
}

impl ModelConfig {
    /// The rate actually used by per-unit families.
    pub fn per_unit_rate(&self) -> f64 {
        self.learning_rate.min(self.per_unit_learning_rate_cap)
    }
}

fn validate_model_config(cfg: &ModelConfig) -> Result<(), ValidationError> {
    if cfg.extreme_wind_threshold < cfg.wind_threshold {
        return Err(ValidationError::new("extreme_wind_below_high_wind"));
    }
    if cfg.gates.mixed_mode_low > cfg.gates.mixed_mode_high {
        return Err(ValidationError::new("mixed_mode_bounds_inverted"));
    }
    if cfg.cooldown.min_hours > cfg.cooldown.max_hours {
        return Err(ValidationError::new("cooldown_bounds_inverted"));
    }
    Ok(())
}

/// Post-auxiliary learning lock.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CooldownConfig {
    #[validate(range(min = 0.0))]
    pub min_hours: f64,
    #[validate(range(min = 0.0))]
    pub max_hours: f64,
    /// Actual/expected ratio at which affected units count as recovered.
    #[validate(range(min = 0.0, max = 2.0))]
    pub convergence_threshold: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            min_hours: 2.0,
            max_hours: 6.0,
            convergence_threshold: 0.95,
        }
    }
}

/// Hour-level conditions under which nothing is learned.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LearningGateConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub mixed_mode_low: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub mixed_mode_high: f64,
    /// kWh above which solar and aux impacts are both "significant".
    #[validate(range(min = 0.0))]
    pub dual_interference_threshold: f64,
}

impl Default for LearningGateConfig {
    fn default() -> Self {
        Self {
            mixed_mode_low: 0.20,
            mixed_mode_high: 0.80,
            dual_interference_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_path: String,
    /// Persist after this many processed hours (0 = only on shutdown).
    pub save_every_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: "data/model_state.json".to_string(),
            save_every_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Wall-clock milliseconds per simulated hour boundary.
    pub tick_millis: u64,
    /// Stop after this many hours (`None` runs until shutdown).
    pub max_hours: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_millis: 250,
            max_hours: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("HDM__").split("__"));
        let cfg: Config = figment.extract().context("failed to load configuration")?;
        cfg.check().context("invalid configuration")?;
        Ok(cfg)
    }

    /// Field ranges plus the cross-section rules figment cannot express.
    pub fn check(&self) -> ModelResult<()> {
        self.model.validate()?;

        let mut seen = BTreeSet::new();
        for unit in &self.simulation.units {
            if !seen.insert(unit.id.as_str()) {
                return Err(ModelError::InvalidConfig(format!(
                    "duplicate simulated unit id '{}'",
                    unit.id
                )));
            }
        }

        let stove = &self.simulation.wood_stove;
        if stove.start_hour >= stove.end_hour || stove.end_hour > 24 {
            return Err(ModelError::InvalidConfig(format!(
                "wood stove window {}..{} is not within one day",
                stove.start_hour, stove.end_hour
            )));
        }
        Ok(())
    }
}
