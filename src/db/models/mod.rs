//! Database models split into domain-specific modules.

pub mod auth_log;
pub mod hierarchy;
pub mod session;
pub mod user;

pub use auth_log::*;
pub use hierarchy::*;
pub use session::*;
pub use user::*;
