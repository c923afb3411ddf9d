//! Token acquisition and renewal.

pub mod error;
pub mod manager;
pub mod token;

pub use error::AuthError;
pub use manager::TokenManager;
pub use token::{TokenState, EXPIRY_MARGIN_SECS};
