//! Webhook invalidation of the podcast index cache

pub mod handler;
pub mod protocol;
pub mod signature;

pub use handler::handle;
pub use protocol::{EVENT_HEADER, SIGNATURE_HEADER};
