pub mod dummy;
pub mod envelope;
pub mod msg;
pub mod unit;

pub use envelope::{ResultEnvelope, WorkEnvelope, WorkOutcome};
pub use msg::{CoordinatorMsg, WorkerMsg};
pub use unit::{OutputRaw, RemoteUnit, UnitKind, UnitRaw};

/// Coordinator-assigned job identity. Monotonically increasing, never reused.
pub type JobId = u64;
