use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use protocol::{CoordinatorMsg, JobId, OutputRaw, UnitRaw, WorkEnvelope, WorkOutcome};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::settings::QuotaTable;

/// A violated bookkeeping rule. These never arise from normal protocol
/// traffic once a session is established, so the dispatch layer treats them
/// as fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job id {0} already registered")]
    DuplicateId(JobId),
    #[error("no job registered under id {0}")]
    UnknownJob(JobId),
    #[error("job {id} is {found}, expected {expected}")]
    InvalidTransition {
        id: JobId,
        expected: String,
        found: String,
    },
    #[error("job {0} is queued but missing from the job table")]
    Inconsistent(JobId),
}

/// Lifecycle of one job. `Completed` and `Failed` are terminal and mutually
/// exclusive; a terminal job never re-enters the queue.
#[derive(Debug, Clone, derive_more::Display, derive_more::IsVariant)]
pub enum JobStatus {
    Submitted,
    SentOut,
    #[display(fmt = "Completed")]
    Completed(OutputRaw),
    #[display(fmt = "Failed: {}", _0)]
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub unit: UnitRaw,
    pub origin: String,
    pub assigned: Option<String>,
    /// Who delivered the outcome; can differ from `assigned` on the wire.
    pub reported_by: Option<String>,
    pub status: JobStatus,
}

/// One row of [`Registry::report`].
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: JobId,
    pub host: Option<String>,
    pub reported_by: Option<String>,
    pub status: JobStatus,
}

/// Where the registry pushes an envelope destined for a worker. Sending
/// happens under the registry lock, so failures can atomically undo the
/// dispatch.
pub trait Outbox {
    fn send(&self, envelope: WorkEnvelope) -> Result<()>;
}

impl Outbox for UnboundedSender<CoordinatorMsg> {
    fn send(&self, envelope: WorkEnvelope) -> Result<()> {
        UnboundedSender::send(self, CoordinatorMsg::Work(envelope))
            .map_err(|_| anyhow::anyhow!("worker session closed"))
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<JobId>,
}

/// The coordinator's single source of truth: every job ever submitted, its
/// status, and the FIFO queue of work not yet handed to a worker.
pub struct Registry {
    quotas: QuotaTable,
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(quotas: QuotaTable) -> Self {
        Self {
            quotas,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn next_id(&self) -> JobId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn quota(&self, hostname: &str) -> usize {
        self.quotas.quota(hostname)
    }

    /// Registers a job under a caller-chosen id and queues it. Ids normally
    /// come from [`next_id`](Self::next_id).
    pub fn enqueue(&self, id: JobId, unit: UnitRaw, origin: String) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        inner.jobs.insert(
            id,
            Job {
                unit,
                origin,
                assigned: None,
                reported_by: None,
                status: JobStatus::Submitted,
            },
        );
        inner.queue.push_back(id);
        Ok(())
    }

    /// Allocates a fresh id, queues the unit, returns the id.
    pub fn submit(&self, unit: UnitRaw, origin: String) -> JobId {
        let id = self.next_id();
        self.enqueue(id, unit, origin)
            .expect("fresh ids are never duplicates");
        id
    }

    /// Hands the next queued job to `host` if the host has a free slot.
    ///
    /// Returns `Ok(true)` when an envelope was sent. `Ok(false)` means there
    /// was nothing to do: the queue is empty, the host is at quota, or the
    /// transmission failed (in which case the job went back to the queue
    /// front and keeps its position).
    pub fn send_out_work(&self, host: &str, outbox: &dyn Outbox) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock();
        let in_flight = inner
            .jobs
            .values()
            .filter(|job| job.status.is_sent_out() && job.assigned.as_deref() == Some(host))
            .count();
        if in_flight >= self.quotas.quota(host) {
            return Ok(false);
        }

        let Some(id) = inner.queue.pop_front() else {
            return Ok(false);
        };
        let envelope = {
            let job = inner.jobs.get(&id).ok_or(RegistryError::Inconsistent(id))?;
            if !job.status.is_submitted() {
                return Err(RegistryError::InvalidTransition {
                    id,
                    expected: "Submitted".to_string(),
                    found: job.status.to_string(),
                });
            }
            WorkEnvelope {
                unit: job.unit.clone(),
                origin: job.origin.clone(),
                id,
            }
        };

        match outbox.send(envelope) {
            Ok(()) => {
                let job = inner.jobs.get_mut(&id).expect("looked up above");
                job.status = JobStatus::SentOut;
                job.assigned = Some(host.to_string());
                info!("job {id} sent to {host}");
                Ok(true)
            }
            Err(err) => {
                inner.queue.push_front(id);
                error!("failed to send job {id} to {host}: {err}");
                Ok(false)
            }
        }
    }

    /// Records the outcome of a job together with the host that reported it.
    pub fn receive(
        &self,
        id: JobId,
        reported_by: String,
        outcome: WorkOutcome,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(&id).ok_or(RegistryError::UnknownJob(id))?;
        if !job.status.is_sent_out() {
            return Err(RegistryError::InvalidTransition {
                id,
                expected: "SentOut".to_string(),
                found: job.status.to_string(),
            });
        }
        job.reported_by = Some(reported_by);
        job.status = match outcome {
            WorkOutcome::Completed(output) => JobStatus::Completed(output),
            WorkOutcome::Failed(message) => JobStatus::Failed(message),
        };
        Ok(())
    }

    /// Removes every job assigned to a vanished host, settled or not, and
    /// resubmits each one as a fresh `Submitted` entry at the back of the
    /// queue under its original id. Returns how many were resubmitted.
    ///
    /// A result delivered by a host that later dies is re-earned rather than
    /// trusted; no job ever disappears short of an explicit [`purge`](Self::purge).
    pub fn mark_as_dead(&self, host: &str) -> usize {
        let mut inner = self.inner.lock();
        let mut doomed: Vec<JobId> = inner
            .jobs
            .iter()
            .filter(|(_, job)| job.assigned.as_deref() == Some(host))
            .map(|(&id, _)| id)
            .collect();
        doomed.sort_unstable();

        let resubmitted = doomed.len();
        for id in doomed {
            let job = inner.jobs.remove(&id).expect("collected above");
            inner.queue.retain(|&queued| queued != id);
            inner.jobs.insert(
                id,
                Job {
                    unit: job.unit,
                    origin: job.origin,
                    assigned: None,
                    reported_by: None,
                    status: JobStatus::Submitted,
                },
            );
            inner.queue.push_back(id);
        }
        resubmitted
    }

    /// Forgets every terminal job. Safe to call repeatedly.
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.jobs.retain(|_, job| !job.status.is_terminal());
    }

    /// True once the queue is empty and every registered job is terminal.
    pub fn finished(&self) -> bool {
        let inner = self.inner.lock();
        inner.queue.is_empty() && inner.jobs.values().all(|job| job.status.is_terminal())
    }

    /// Snapshot of every registered job, ordered by id.
    pub fn report(&self) -> Vec<JobReport> {
        let inner = self.inner.lock();
        let mut rows: Vec<JobReport> = inner
            .jobs
            .iter()
            .map(|(&id, job)| JobReport {
                id,
                host: job.assigned.clone(),
                reported_by: job.reported_by.clone(),
                status: job.status.clone(),
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}
