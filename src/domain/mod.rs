pub mod types;
pub mod weather;

pub use types::*;
pub use weather::*;
