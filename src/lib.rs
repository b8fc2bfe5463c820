pub mod config;
pub mod error;
pub mod kernel;
pub mod outputs;
pub mod runtime;
pub mod services;
pub mod simulate;

// Re-export specific items if needed for convenient access
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use runtime::{EventSummary, SessionController, Sinks};
