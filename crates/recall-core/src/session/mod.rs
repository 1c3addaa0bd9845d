pub mod state;

pub use state::{EngineState, TriggerRecord};
