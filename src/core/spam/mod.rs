// Spam-scoring module - per-message signal scoring and flood indexes.

pub mod spam_models;
pub mod spam_service;

pub use spam_models::*;
pub use spam_service::*;
