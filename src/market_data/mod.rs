pub mod registry;
pub mod rolling_stats;

// Re-export the core types for convenient access
// (e.g. `use crate::market_data::InstrumentRegistry`).
pub use registry::{InstrumentEntry, InstrumentRegistry, RegistryError};
pub use rolling_stats::RollingStatistics;
