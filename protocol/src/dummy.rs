use std::{thread, time::Duration};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::{RemoteUnit, UnitKind};

/// How long a demo unit takes on average, in milliseconds.
pub const MEAN_MILLIS: u64 = 4000;

/// The actual time is the mean plus or minus this value.
pub const WIDTH_MILLIS: u64 = 1000;

/// A unit for exercising the coordinator/worker loop end to end.
/// Sleeps for a while, or errors out on request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DummyUnit {
    pub millis: u64,
    pub fail: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DummyOutput {
    pub slept_ms: u64,
}

impl RemoteUnit for DummyUnit {
    type Output = DummyOutput;

    fn kind() -> UnitKind {
        UnitKind::Dummy
    }
}

impl DummyUnit {
    pub fn run(&self) -> Result<DummyOutput> {
        if self.fail {
            bail!("this is a contrived error");
        }
        thread::sleep(Duration::from_millis(self.millis));
        Ok(DummyOutput {
            slept_ms: self.millis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_unit_reports_an_error() {
        let unit = DummyUnit {
            millis: 0,
            fail: true,
        };
        let err = unit.run().unwrap_err();
        assert!(err.to_string().contains("contrived"));
    }

    #[test]
    fn quiet_unit_reports_its_sleep() {
        let unit = DummyUnit {
            millis: 1,
            fail: false,
        };
        assert_eq!(unit.run().unwrap(), DummyOutput { slept_ms: 1 });
    }
}
