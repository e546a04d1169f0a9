//! # Synthetic Weather
//!
//! Hourly outdoor temperature, wind and solar factor with a diurnal cycle,
//! slow synoptic drift and Gaussian noise. Seeded for reproducible runs.

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Weather generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Mean outdoor temperature in °C
    pub mean_temp_c: f64,
    /// Half the day/night swing in °C
    pub diurnal_amplitude_c: f64,
    /// Standard deviation of the slow multi-day drift in °C
    pub drift_std_dev_c: f64,
    /// Mean sustained wind speed in m/s
    pub mean_wind_ms: f64,
    pub wind_std_dev_ms: f64,
    /// Probability per hour that the cloud cover changes regime
    pub cloud_change_probability: f64,
    pub sunrise_hour: u32,
    pub sunset_hour: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            mean_temp_c: 2.0,
            diurnal_amplitude_c: 3.0,
            drift_std_dev_c: 0.4,
            mean_wind_ms: 4.0,
            wind_std_dev_ms: 1.2,
            cloud_change_probability: 0.15,
            sunrise_hour: 8,
            sunset_hour: 16,
        }
    }
}

/// One hour of weather, wind in m/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub temp_c: f64,
    pub wind_ms: f64,
    pub gust_ms: f64,
    /// 0 (dark or overcast) to 1 (full sun)
    pub solar_factor: f64,
}

pub struct WeatherGenerator {
    config: WeatherConfig,
    rng: StdRng,
    drift_c: f64,
    wind_ms: f64,
    cloud_cover: f64,
    current_time: DateTime<Utc>,
}

impl WeatherGenerator {
    pub fn new(config: WeatherConfig, start_time: DateTime<Utc>, seed: u64) -> Self {
        let wind_ms = config.mean_wind_ms;
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            drift_c: 0.0,
            wind_ms,
            cloud_cover: 0.5,
            current_time: start_time,
        }
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        match Normal::new(0.0, std_dev.max(0.0)) {
            Ok(normal) => normal.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }

    /// Advance one hour and return the weather of the hour that just started.
    pub fn next_hour(&mut self) -> WeatherSample {
        let timestamp = self.current_time;
        let hour = timestamp.hour() as f64;

        // Coldest around 04:00, warmest around 16:00
        let diurnal = self.config.diurnal_amplitude_c * ((hour - 10.0) * PI / 12.0).sin();
        let drift_step = self.gaussian(self.config.drift_std_dev_c);
        self.drift_c = 0.97 * self.drift_c + drift_step;
        let temp_c = self.config.mean_temp_c + diurnal + self.drift_c + self.gaussian(0.3);

        // Mean-reverting wind
        let wind_step = self.gaussian(self.config.wind_std_dev_ms);
        self.wind_ms = (self.wind_ms + 0.3 * (self.config.mean_wind_ms - self.wind_ms) + wind_step)
            .max(0.0);
        let gust_ms = self.wind_ms * self.rng.gen_range(1.1..1.8);

        if self.rng.gen::<f64>() < self.config.cloud_change_probability {
            self.cloud_cover = self.rng.gen_range(0.0..1.0);
        }
        let solar_factor = self.daylight(timestamp.hour()) * (1.0 - self.cloud_cover);

        self.current_time = timestamp + Duration::hours(1);

        WeatherSample {
            timestamp,
            temp_c,
            wind_ms: self.wind_ms,
            gust_ms,
            solar_factor: solar_factor.clamp(0.0, 1.0),
        }
    }

    /// Half-sine between sunrise and sunset
    fn daylight(&self, hour: u32) -> f64 {
        let (rise, set) = (self.config.sunrise_hour, self.config.sunset_hour);
        if hour < rise || hour >= set || set <= rise {
            return 0.0;
        }
        let progress = (hour - rise) as f64 + 0.5;
        (progress * PI / (set - rise) as f64).sin()
    }
}
