/// Monitoring engine module - probing, escalation and scheduling
///
/// This module is responsible for:
/// - Executing HTTP checks against job targets
/// - Escalating failing jobs through rapid checks and pauses
/// - Owning one timer task per scheduled job
pub mod checker;
pub mod engine;
pub mod escalation;
pub mod history;
pub mod interval;
pub mod scheduler;
pub mod types;

pub use checker::{HttpProber, Prober};
pub use engine::Engine;
pub use interval::Cadence;
pub use scheduler::{MonitoringScheduler, Plan};
pub use types::ProbeOutcome;
