// Registry module - canonical per-user records and the persisted snapshot.

pub mod registry_models;
pub mod registry_service;

pub use registry_models::*;
pub use registry_service::*;
