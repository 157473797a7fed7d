// Relay layer - admin commands and enforcement translation for the chat
// transport. Everything platform-specific lives under this module.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "enforcement.rs"]
pub mod enforcement;

// Re-export the shared framework types for convenience.
pub use commands::{Data, Error};
