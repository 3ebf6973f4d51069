use std::collections::HashMap;

use parking_lot::Mutex;
use protocol::CoordinatorMsg;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

const MAX_RENAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, thiserror::Error)]
#[error("no free name for worker {announced} after {MAX_RENAME_ATTEMPTS} rename attempts")]
pub struct NameResolutionError {
    pub announced: String,
}

pub struct WorkerHandle {
    pub outbox: UnboundedSender<CoordinatorMsg>,
}

/// The set of live worker sessions, keyed by their resolved names. Two
/// workers announcing the same hostname get distinct names here; the second
/// is suffixed `-1`, the third `-2`, and so on.
#[derive(Default)]
pub struct KnownWorkers {
    inner: Mutex<HashMap<String, WorkerHandle>>,
}

impl KnownWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a unique name for a session announcing `announced` and stores
    /// its outbox under it. Returns the resolved name.
    pub fn register(
        &self,
        announced: &str,
        outbox: UnboundedSender<CoordinatorMsg>,
    ) -> Result<String, NameResolutionError> {
        let mut inner = self.inner.lock();
        let mut name = announced.to_string();
        let mut attempt = 0;
        while inner.contains_key(&name) {
            attempt += 1;
            if attempt > MAX_RENAME_ATTEMPTS {
                return Err(NameResolutionError {
                    announced: announced.to_string(),
                });
            }
            name = format!("{announced}-{attempt}");
        }
        if name != announced {
            warn!("worker {announced} already known, renamed to {name}");
        }
        inner.insert(name.clone(), WorkerHandle { outbox });
        Ok(name)
    }

    pub fn remove(&self, name: &str) {
        self.inner.lock().remove(name);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
