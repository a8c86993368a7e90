//! Till Types - Shared domain types
//!
//! This crate contains domain types used across the till session coordinator:
//! - User identity and roles
//! - Store and store settings
//! - Session state and persisted credentials

pub mod session;
pub mod store;
pub mod user;

pub use session::*;
pub use store::*;
pub use user::*;
