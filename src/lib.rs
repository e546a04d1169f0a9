//! Adaptive heating demand model.
//!
//! Learns how much energy a building and each of its heating units use per
//! hour, bucketed by outdoor temperature and wind, and reconciles the
//! whole-building view with the per-unit view without forcing them to agree.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod learning;
pub mod model;
pub mod predictor;
pub mod reconcile;
pub mod repo;
pub mod simulation;
pub mod solar;
pub mod telemetry;
