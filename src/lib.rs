pub mod api;
pub mod auth;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod node;
pub mod storage;
pub mod store;

// Re-exports
pub use crate::api::routes::{create_router, AppState};
pub use crate::core::factory::{Collaborators, CreateVmRequest, VmFactory};
pub use crate::errors::{VmError, VmResult};
