use crate::config::ModelConfig;
use crate::domain::{effective_wind, BucketKey, TempKey, WindBucket};

/// Nearest-integer temperature label.
pub fn temp_key(temp_c: f64) -> TempKey {
    TempKey::from_temperature(temp_c)
}

/// Classify an effective wind speed (m/s) against the two thresholds.
pub fn wind_bucket(
    effective_wind_ms: f64,
    high_threshold: f64,
    extreme_threshold: f64,
) -> WindBucket {
    if effective_wind_ms >= extreme_threshold {
        WindBucket::ExtremeWind
    } else if effective_wind_ms >= high_threshold {
        WindBucket::HighWind
    } else {
        WindBucket::Normal
    }
}

/// Maps continuous weather readings to model bucket keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketClassifier {
    pub wind_threshold: f64,
    pub extreme_wind_threshold: f64,
    pub wind_gust_factor: f64,
}

impl BucketClassifier {
    pub fn new(wind_threshold: f64, extreme_wind_threshold: f64) -> Self {
        Self {
            wind_threshold,
            extreme_wind_threshold,
            wind_gust_factor: crate::config::DEFAULT_WIND_GUST_FACTOR,
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            wind_threshold: cfg.wind_threshold,
            extreme_wind_threshold: cfg.extreme_wind_threshold,
            wind_gust_factor: cfg.wind_gust_factor,
        }
    }

    pub fn wind_bucket(&self, effective_wind_ms: f64) -> WindBucket {
        wind_bucket(effective_wind_ms, self.wind_threshold, self.extreme_wind_threshold)
    }

    /// Bucket for an (inertia-weighted) temperature and an effective wind speed.
    pub fn classify(&self, temp_c: f64, effective_wind_ms: f64) -> BucketKey {
        BucketKey::new(temp_key(temp_c), self.wind_bucket(effective_wind_ms))
    }

    /// Bucket from raw sustained speed and optional gust, both in m/s.
    pub fn classify_raw(&self, temp_c: f64, wind_speed_ms: f64, gust_ms: Option<f64>) -> BucketKey {
        let effective = effective_wind(wind_speed_ms, gust_ms, self.wind_gust_factor);
        self.classify(temp_c, effective)
    }
}

impl Default for BucketClassifier {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, WindBucket::Normal)]
    #[case(5.49, WindBucket::Normal)]
    #[case(5.5, WindBucket::HighWind)]
    #[case(10.79, WindBucket::HighWind)]
    #[case(10.8, WindBucket::ExtremeWind)]
    #[case(25.0, WindBucket::ExtremeWind)]
    fn test_wind_bucket_thresholds(#[case] wind: f64, #[case] expected: WindBucket) {
        assert_eq!(BucketClassifier::default().wind_bucket(wind), expected);
    }

    #[test]
    fn test_classify_combines_both_axes() {
        let classifier = BucketClassifier::default();
        assert_eq!(
            classifier.classify(-3.6, 7.0),
            BucketKey::new(TempKey(-4), WindBucket::HighWind)
        );
    }

    #[rstest]
    #[case(2.5, 2)]
    #[case(3.5, 4)]
    #[case(0.5, 0)]
    #[case(-0.5, 0)]
    #[case(-2.5, -2)]
    fn test_half_degrees_round_to_even_key(#[case] temp: f64, #[case] expected: i32) {
        let key = BucketClassifier::default().classify(temp, 0.0);
        assert_eq!(key.temp_key, TempKey(expected));
    }

    #[test]
    fn test_classify_raw_uses_gusts() {
        let classifier = BucketClassifier::default();
        // 4.0 + (7.0 - 4.0) * 0.6 = 5.8 -> high wind
        let key = classifier.classify_raw(2.2, 4.0, Some(7.0));
        assert_eq!(key.wind_bucket, WindBucket::HighWind);
        assert_eq!(key.temp_key, TempKey(2));
        assert_eq!(classifier.classify_raw(2.2, 4.0, None).wind_bucket, WindBucket::Normal);
    }
}
