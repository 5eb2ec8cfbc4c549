//! Authentication: token lifecycle management and the identity-server
//! clients.

mod client;
mod manager;

pub use client::{HttpTokenService, HttpTransport, TokenService, Transport};
pub use manager::{TokenLifecycleManager, DEFAULT_MAX_RETRIES};
