// Account-trust module - heuristic identity verification.

pub mod trust_models;
pub mod trust_service;

pub use trust_models::*;
pub use trust_service::*;
