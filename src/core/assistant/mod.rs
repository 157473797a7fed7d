// Assistant module - the completion-service boundary.

pub mod assistant_service;

pub use assistant_service::*;
