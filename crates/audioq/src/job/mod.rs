pub mod context;
pub mod item;
pub mod machine;
pub mod orchestrator;
pub mod script;
pub mod token;

pub use orchestrator::{JobOrchestrator, OrchestratorError};
