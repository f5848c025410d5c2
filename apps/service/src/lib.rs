//! AutoPing service library.
//!
//! Stores uptime monitoring jobs in libSQL, probes their targets on a fixed
//! cadence, escalates failing targets and sends alert emails.

pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod notifications;
pub mod orchestrator;
pub mod pool;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use orchestrator::{CreateJob, JobView, Orchestrator};
