pub mod activity;
pub mod engine;
pub mod status;
pub mod store;
pub mod trigger;
pub mod types;

pub use activity::ActivityLog;
pub use engine::{AutomationEngine, AutomationError, EngineOptions, IterationOutcome};
pub use status::{DetailedStatus, JobStatus, Statistics};
pub use store::ConfigStore;
pub use types::{Action, ActivityLogEntry, JobConfig, JobPatch, NewJob};
