use serde::{Deserialize, Serialize};

use crate::{ResultEnvelope, WorkEnvelope};

/// Frames sent coordinator to worker. `Hello` carries the coordinator's bare
/// hostname and is the first frame of every session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum CoordinatorMsg {
    Hello(String),
    Work(WorkEnvelope),
}

/// Frames sent worker to coordinator. `Hello` announces the worker's
/// hostname and must precede any `Result`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum WorkerMsg {
    Hello(String),
    Result(ResultEnvelope),
}
