//! Shared tracing setup for the AutoPing binaries.

mod subscriber;

pub use subscriber::init_tracing;
