use serde::{Deserialize, Serialize};

use crate::{JobId, OutputRaw, UnitRaw};

/// Wraps a work unit for transmission, coordinator to worker.
///
/// Envelopes are value objects: two are equal iff every field is equal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkEnvelope {
    pub unit: UnitRaw,
    pub origin: String,
    pub id: JobId,
}

/// Carries the outcome of one work unit back, worker to coordinator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResultEnvelope {
    pub outcome: WorkOutcome,
    pub origin: String,
    pub id: JobId,
}

/// Exactly one of a result value or an error message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, derive_more::From, derive_more::IsVariant)]
pub enum WorkOutcome {
    Completed(OutputRaw),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use crate::UnitKind;

    use super::*;

    fn envelope(id: JobId) -> WorkEnvelope {
        WorkEnvelope {
            unit: UnitRaw {
                kind: UnitKind::Dummy,
                payload: vec![1, 2, 3],
            },
            origin: "origin-host".to_string(),
            id,
        }
    }

    #[test]
    fn envelopes_compare_by_value() {
        assert_eq!(envelope(7), envelope(7));
        assert_ne!(envelope(7), envelope(8));

        let mut other = envelope(7);
        other.origin = "elsewhere".to_string();
        assert_ne!(envelope(7), other);
    }
}
