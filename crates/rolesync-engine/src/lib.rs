//! Reconciliation core for rolesync.
//!
//! - [`engine::ReconciliationEngine`]: one fetch/diff/apply pass over every configured group
//! - [`diff`]: desired vs. actual role membership
//! - [`audit::AuditEmitter`]: per-pass change summaries
//! - [`heartbeat::HeartbeatReporter`]: debounced liveness reports
//! - [`scheduler::Scheduler`]: the two recurring timers
//! - [`service::SyncService`]: wiring and the public read path

pub mod audit;
pub mod diff;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod scheduler;
pub mod service;
pub mod traits;

pub use audit::{AuditEmitter, Delivery};
pub use diff::{compute_changes, decide, Diff};
pub use engine::{EngineConfig, GroupSummary, PassOutcome, PassSummary, ReconciliationEngine};
pub use error::{ReconcileError, ReconcileResult};
pub use heartbeat::{HeartbeatConfig, HeartbeatOutcome, HeartbeatReporter, HealthSource};
pub use scheduler::{PeriodicTask, Scheduler};
pub use service::{ServiceSettings, SyncService};
pub use traits::{MessageSink, RoleMutator, RosterSource};
