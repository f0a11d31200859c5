//! Data models for the session lifecycle.
//!
//! - `User`: the signed-in account, persisted as JSON
//! - `TokenPair`: access/refresh tokens with an absolute expiry
//! - `SessionState`: in-memory view observed by front-ends

pub mod session;
pub mod token;
pub mod user;

pub use session::{SessionPhase, SessionState};
pub use token::TokenPair;
pub use user::{ProfileUpdate, User};
