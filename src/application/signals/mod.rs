pub mod pcr;

pub use pcr::{PcrSignalTemplate, PcrThresholds};
