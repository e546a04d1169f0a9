//! # Heating Controller
//!
//! Hourly loop that ties the pieces together: read one hour of meter and
//! weather data, condition the inputs, reconcile the hour against the
//! current models, learn from it and persist the store periodically.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, ModelConfig};
use crate::domain::{effective_wind, weighted_inertia, BucketKey, UnitId};
use crate::learning::{
    AuxCooldown, CooldownExit, HistoricalPoint, HourlyObservation, ImportOutcome, LearningEngine,
    LearningResult,
};
use crate::model::{BucketClassifier, ModelStore};
use crate::reconcile::{Conditions, Reconciliation, ReconciliationEngine};
use crate::repo::{JsonFileRepository, ModelRepository};
use crate::simulation::{BuildingSimulator, SimulatedHour};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub controller: Arc<HeatingController>,
    pub repo: Arc<dyn ModelRepository>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let repo: Arc<dyn ModelRepository> =
            Arc::new(JsonFileRepository::new(&cfg.storage.state_path));
        Self::with_repository(cfg, repo).await
    }

    pub async fn with_repository(cfg: Config, repo: Arc<dyn ModelRepository>) -> Result<Self> {
        let store = match repo.load().await? {
            Some(store) => store,
            None => {
                info!("No saved model, starting from an empty store");
                ModelStore::new()
            }
        };
        let simulator = BuildingSimulator::new(cfg.simulation.clone(), cfg.model.wind_unit);
        let controller = Arc::new(HeatingController::new(&cfg, store, repo.clone(), simulator));
        Ok(Self {
            cfg,
            controller,
            repo,
        })
    }
}

pub fn spawn_controller_tasks(state: AppState, cfg: Config) -> JoinHandle<()> {
    let controller = state.controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller
            .run(cfg.controller.tick_millis, cfg.controller.max_hours)
            .await
        {
            warn!(error=%e, "controller loop stopped");
        }
    })
}

/// Everything the controller did with one hour.
#[derive(Debug, Clone, Serialize)]
pub struct HourReport {
    pub hour_index: u64,
    pub timestamp: DateTime<Utc>,
    pub bucket: BucketKey,
    pub inertia_temp: f64,
    pub effective_wind: f64,
    pub observation: HourlyObservation,
    pub reconciliation: Reconciliation,
    pub learning: LearningResult,
    pub cooldown_active: bool,
    pub cooldown_exit: Option<CooldownExit>,
}

/// Mutable state owned by the hourly loop.
struct LoopState {
    simulator: BuildingSimulator,
    cooldown: AuxCooldown,
    /// Oldest first, bounded by the inertia window.
    temp_history: Vec<f64>,
    hours_processed: u64,
}

pub struct HeatingController {
    cfg: ModelConfig,
    save_every_hours: u32,
    store: Arc<RwLock<ModelStore>>,
    repo: Arc<dyn ModelRepository>,
    classifier: BucketClassifier,
    learning: LearningEngine,
    reconciliation: ReconciliationEngine,
    loop_state: Mutex<LoopState>,
}

impl HeatingController {
    pub fn new(
        cfg: &Config,
        store: ModelStore,
        repo: Arc<dyn ModelRepository>,
        simulator: BuildingSimulator,
    ) -> Self {
        Self {
            cfg: cfg.model.clone(),
            save_every_hours: cfg.storage.save_every_hours,
            store: Arc::new(RwLock::new(store)),
            repo,
            classifier: BucketClassifier::from_config(&cfg.model),
            learning: LearningEngine::new(&cfg.model),
            reconciliation: ReconciliationEngine::new(&cfg.model),
            loop_state: Mutex::new(LoopState {
                simulator,
                cooldown: AuxCooldown::new(),
                temp_history: Vec::new(),
                hours_processed: 0,
            }),
        }
    }

    pub async fn run(&self, tick_millis: u64, max_hours: Option<u64>) -> Result<()> {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(tick_millis.max(1)));
        loop {
            interval.tick().await;
            let report = self.step().await;
            if max_hours.is_some_and(|max| report.hour_index >= max) {
                info!(hours = report.hour_index, "simulation finished");
                return Ok(());
            }
        }
    }

    /// Simulate, reconcile and learn one hour.
    pub async fn step(&self) -> HourReport {
        let mut state = self.loop_state.lock().await;
        let hour = state.simulator.tick_hour();
        let report = self.process(&mut state, &hour).await;

        if self.save_every_hours > 0 && report.hour_index % u64::from(self.save_every_hours) == 0 {
            if let Err(e) = self.save().await {
                warn!(error=%e, "periodic model save failed");
            }
        }
        report
    }

    async fn process(&self, state: &mut LoopState, hour: &SimulatedHour) -> HourReport {
        let weights = self.cfg.inertia_profile.weights();
        state.temp_history.push(hour.weather.temp_c);
        if state.temp_history.len() > weights.len() {
            let excess = state.temp_history.len() - weights.len();
            state.temp_history.drain(..excess);
        }
        let inertia_temp = weighted_inertia(&state.temp_history, weights);

        let wind_unit = self.cfg.wind_unit;
        let effective_wind = effective_wind(
            wind_unit.to_ms(hour.wind_speed),
            Some(wind_unit.to_ms(hour.wind_gust)),
            self.cfg.wind_gust_factor,
        );
        let bucket = self.classifier.classify(inertia_temp, effective_wind);
        let aux_active = hour.aux_active();

        // Aux edges are seen as they happen, before the hour's exit check
        state.cooldown.observe_aux(aux_active, hour.weather.timestamp);
        let cooldown_active = state.cooldown.is_active();

        let conditions = Conditions {
            temp: inertia_temp,
            effective_wind,
            solar_factor: hour.weather.solar_factor,
            aux_active,
            units: hour.unit_modes.clone(),
            known_aux_impact_kwh: None,
        };

        let mut store = self.store.write().await;
        let reconciliation = self.reconciliation.reconcile(&store, &conditions);

        let observation = HourlyObservation {
            bucket,
            avg_temp: inertia_temp,
            total_energy_kwh: hour.total_energy_kwh,
            unit_energy_kwh: hour.unit_energy_kwh.clone(),
            unit_modes: hour.unit_modes.clone(),
            solar_factor: hour.weather.solar_factor,
            solar_impact_kwh: reconciliation.breakdown.solar_reduction_kwh,
            aux_active,
            aux_fraction: hour.aux_fraction,
            aux_impact_kwh: reconciliation.global_aux_reduction_kwh,
            guest_activity: false,
            sample_count: hour.sample_count,
        };

        let expected: BTreeMap<UnitId, f64> = observation
            .unit_energy_kwh
            .keys()
            .map(|unit| {
                let base = self.learning.expected_unit_base(&store, unit, &observation);
                (unit.clone(), base)
            })
            .collect();
        let cooldown_exit = state.cooldown.check_exit(
            hour.end_time(),
            &self.cfg.cooldown,
            &self.cfg.affected_units,
            &observation.unit_energy_kwh,
            &expected,
        );

        let learning = self
            .learning
            .process_hour(&mut store, &observation, cooldown_active);
        drop(store);

        state.hours_processed += 1;
        info!(
            hour = state.hours_processed,
            timestamp = %hour.weather.timestamp,
            bucket = %bucket,
            inertia_temp,
            effective_wind,
            actual_kwh = hour.total_energy_kwh,
            predicted_kwh = reconciliation.total_kwh,
            unspecified_kwh = reconciliation.breakdown.unspecified_kwh,
            aux_active,
            cooldown_active,
            status = %learning.status,
            "hour processed"
        );

        HourReport {
            hour_index: state.hours_processed,
            timestamp: hour.weather.timestamp,
            bucket,
            inertia_temp,
            effective_wind,
            observation,
            reconciliation,
            learning,
            cooldown_active,
            cooldown_exit,
        }
    }

    /// Reconcile arbitrary conditions against the current models.
    pub async fn forecast(&self, conditions: &Conditions) -> Reconciliation {
        let store = self.store.read().await;
        self.reconciliation.reconcile(&store, conditions)
    }

    /// Train the global models from a meter history.
    pub async fn import_history(&self, points: &[HistoricalPoint]) -> Vec<ImportOutcome> {
        let mut store = self.store.write().await;
        let outcomes: Vec<_> = points
            .iter()
            .map(|point| self.learning.learn_from_historical(&mut store, point))
            .collect();
        info!(points = points.len(), "historical import finished");
        outcomes
    }

    pub async fn exit_cooldown(&self) -> Option<CooldownExit> {
        self.loop_state.lock().await.cooldown.exit_manually()
    }

    /// Wipe every learned value.
    pub async fn reset_model(&self) {
        self.store.write().await.reset_all();
        warn!("model reset");
    }

    pub async fn reset_unit(&self, unit: &str) {
        self.store.write().await.reset_unit(unit);
        warn!(unit, "unit model reset");
    }

    pub async fn snapshot(&self) -> ModelStore {
        self.store.read().await.clone()
    }

    pub async fn save(&self) -> Result<()> {
        let store = self.store.read().await;
        self.repo.save(&store).await?;
        debug!("model saved");
        Ok(())
    }
}
