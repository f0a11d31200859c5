//! Authentication lifecycle.
//!
//! - `tokens`: the `TokenService`, owner of token persistence and renewal
//! - `session`: the `SessionManager` state machine built on top of it

pub mod error;
pub mod session;
pub mod tokens;

pub use error::{SessionError, TokenError};
pub use session::SessionManager;
pub use tokens::{TokenService, DEFAULT_RENEWAL_BUFFER_SECS, DEFAULT_TOKEN_TTL_SECS};
