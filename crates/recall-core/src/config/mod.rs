pub mod settings;

pub use settings::{BudgetSettings, DetectorSettings, EngineConfig, EnginePaths, LoggingSettings};
