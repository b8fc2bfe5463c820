pub mod controller;
pub mod pipeline;

pub use controller::{EventSummary, SessionController};
pub use pipeline::Sinks;
