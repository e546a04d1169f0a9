pub mod classifier;
pub mod ema;
pub mod store;

pub use classifier::{temp_key, wind_bucket, BucketClassifier};
pub use ema::{BufferedEma, EmaStep};
pub use store::{
    BucketBuffers, BucketMap, Cell, LearningBuffers, ModelStore, ObservationCounts, SolarBuffers,
    SolarMap,
};
