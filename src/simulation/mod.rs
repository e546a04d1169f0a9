//! Simulation Framework
//!
//! Synthetic weather and a multi-unit house used to drive the controller
//! without real meters.

pub mod building;
pub mod weather;

pub use building::{
    BuildingConfig, BuildingSimulator, SimUnitConfig, SimulatedHour, WoodStoveConfig,
};
pub use weather::{WeatherConfig, WeatherGenerator, WeatherSample};
