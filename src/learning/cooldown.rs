//! Post-auxiliary cooldown lock.
//!
//! After the auxiliary source switches off, affected rooms are still warm and
//! under-consume for a while. Learning the base model from those hours would
//! drag it down, so the global base is frozen and affected units are skipped
//! until they converge back to their expected base or a timeout expires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{CooldownConfig, ENERGY_GUARD_THRESHOLD};
use crate::domain::{AffectedUnits, UnitId};

/// Why a cooldown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CooldownExit {
    MaxDuration,
    Converged,
    AuxReactivated,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxCooldown {
    started_at: Option<DateTime<Utc>>,
    last_aux_active: bool,
}

impl AuxCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Track the auxiliary flag. A true -> false edge starts the cooldown,
    /// re-activation cancels it.
    pub fn observe_aux(&mut self, aux_active: bool, now: DateTime<Utc>) -> Option<CooldownExit> {
        let was_active = std::mem::replace(&mut self.last_aux_active, aux_active);
        match (was_active, aux_active) {
            (true, false) => {
                info!(started_at = %now, "Aux cooldown started");
                self.started_at = Some(now);
                None
            }
            (_, true) if self.is_active() => {
                info!("Aux re-activated, cooldown cancelled");
                self.started_at = None;
                Some(CooldownExit::AuxReactivated)
            }
            _ => None,
        }
    }

    pub fn exit_manually(&mut self) -> Option<CooldownExit> {
        self.started_at.take().map(|_| {
            info!("Aux cooldown exited manually");
            CooldownExit::Manual
        })
    }

    /// Hourly exit check.
    ///
    /// `unit_actual` and `unit_expected_base` cover the hour that just ended.
    /// Convergence compares the affected units' summed actual against their
    /// summed expected base.
    pub fn check_exit(
        &mut self,
        now: DateTime<Utc>,
        cfg: &CooldownConfig,
        affected: &AffectedUnits,
        unit_actual: &BTreeMap<UnitId, f64>,
        unit_expected_base: &BTreeMap<UnitId, f64>,
    ) -> Option<CooldownExit> {
        let started_at = self.started_at?;
        let elapsed_hours = (now - started_at).num_seconds() as f64 / 3600.0;

        if elapsed_hours >= cfg.max_hours {
            info!(elapsed_hours, "Aux cooldown: max duration exceeded, exiting lock");
            self.started_at = None;
            return Some(CooldownExit::MaxDuration);
        }
        if elapsed_hours < cfg.min_hours {
            return None;
        }

        let affected_ids = unit_actual
            .keys()
            .chain(unit_expected_base.keys())
            .filter(|unit| affected.contains(unit));
        let mut seen = std::collections::BTreeSet::new();
        let (mut actual_sum, mut expected_sum) = (0.0, 0.0);
        for unit in affected_ids {
            if seen.insert(unit) {
                actual_sum += unit_actual.get(unit).copied().unwrap_or(0.0);
                expected_sum += unit_expected_base.get(unit).copied().unwrap_or(0.0);
            }
        }

        if expected_sum <= ENERGY_GUARD_THRESHOLD {
            debug!("Aux cooldown: no expected consumption to verify convergence");
            return None;
        }

        let ratio = actual_sum / expected_sum;
        if ratio >= cfg.convergence_threshold {
            info!(ratio, "Aux cooldown: convergence reached, exiting lock");
            self.started_at = None;
            Some(CooldownExit::Converged)
        } else {
            debug!(ratio, threshold = cfg.convergence_threshold, "Aux cooldown still active");
            None
        }
    }
}
