pub mod args;
pub mod browser;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod gateway;
pub mod history;
pub mod logging;
pub mod pacing;
pub mod protocol;
pub mod relay;
pub mod roster;
pub mod runner;
pub mod template;

// Re-export the core types at crate root for convenience
pub use protocol::{ControlMessage, EventMessage};
pub use roster::Contact;
pub use runner::{BatchRunner, BatchSummary, DispatchOutcome, OutcomeKind};
