use anyhow::{ensure, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Tag that tells a worker which concrete unit type a raw payload holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq, derive_more::Display)]
pub enum UnitKind {
    Dummy,
}

/// An opaque, bincode-packed work unit. The coordinator never looks inside;
/// only a worker unpacks it, dispatching on `kind`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnitRaw {
    pub kind: UnitKind,
    pub payload: Vec<u8>,
}

/// The packed result value produced by executing a [`UnitRaw`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutputRaw {
    pub kind: UnitKind,
    pub payload: Vec<u8>,
}

/// A unit of work that can be shipped to a worker and executed there.
pub trait RemoteUnit: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn kind() -> UnitKind;
}

impl UnitRaw {
    pub fn pack<U: RemoteUnit>(unit: &U) -> Result<Self> {
        Ok(Self {
            kind: U::kind(),
            payload: bincode::serialize(unit)?,
        })
    }

    pub fn unpack<U: RemoteUnit>(&self) -> Result<U> {
        ensure!(
            self.kind == U::kind(),
            "expected a {} payload, found {}",
            U::kind(),
            self.kind
        );
        Ok(bincode::deserialize(&self.payload)?)
    }
}

impl OutputRaw {
    pub fn pack<U: RemoteUnit>(output: &U::Output) -> Result<Self> {
        Ok(Self {
            kind: U::kind(),
            payload: bincode::serialize(output)?,
        })
    }

    pub fn unpack<U: RemoteUnit>(&self) -> Result<U::Output> {
        ensure!(
            self.kind == U::kind(),
            "expected a {} output, found {}",
            U::kind(),
            self.kind
        );
        Ok(bincode::deserialize(&self.payload)?)
    }
}
