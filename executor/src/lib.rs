//! A fixed-size worker-thread pool for running work units in-process.
//!
//! The pool has a bounded backlog; when it is full the submitting thread runs
//! the unit itself, so work is never dropped and producers are throttled by
//! execution. Completion is observed through a future-like [`JobHandle`] that
//! can be awaited from async code or joined from a plain thread.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{sync_channel, Receiver, SyncSender, TrySendError},
        Arc,
    },
    task::{Context, Poll},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::sync::oneshot;
use tracing::{error, info};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// A piece of work that can run on the pool.
pub trait WorkUnit: Send + 'static {
    type Output: Send + 'static;

    fn execute(self) -> Result<Self::Output>;
}

impl<F, T> WorkUnit for F
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn execute(self) -> Result<T> {
        self()
    }
}

type Task = Box<dyn FnOnce() + Send>;

pub struct LocalExecutor {
    queue: SyncSender<Task>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl LocalExecutor {
    pub fn new(threads: usize, backlog: usize) -> Self {
        let (tx, rx) = sync_channel::<Task>(backlog);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(threads);
        for n in 0..threads {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("exec-{n}"))
                .spawn(move || run_worker(rx))
                .expect("failed to spawn executor thread");
            handles.push(handle);
        }
        info!("local executor started with {threads} threads");

        Self {
            queue: tx,
            threads: handles,
        }
    }

    /// Submits one unit. Failures are logged and otherwise discarded unless
    /// the caller watches the returned handle.
    pub fn submit<U: WorkUnit>(&self, unit: U) -> JobHandle<U::Output> {
        self.submit_with_callback(unit, |outcome| {
            if let Err(err) = outcome {
                error!("work unit failed: {err:#}");
            }
        })
    }

    /// Submits one unit with a completion callback. The callback fires exactly
    /// once, on the executing thread, before the handle resolves.
    pub fn submit_with_callback<U, F>(&self, unit: U, callback: F) -> JobHandle<U::Output>
    where
        U: WorkUnit,
        F: FnOnce(&Result<U::Output>) + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let outcome = unit.execute();
            callback(&outcome);
            let _ = done_tx.send(outcome);
        });

        // Bounded backlog: when the queue is full (or the pool is shut down)
        // the submitting thread runs the unit itself.
        match self.queue.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => task(),
        }

        JobHandle { inner: done_rx }
    }

    /// Fans out a batch and blocks until every unit has completed or failed.
    /// A failure counts as "done" for waiting purposes; remaining units keep
    /// running. Outputs come back in submission order, and failed units
    /// contribute no output, so the result may be shorter than the batch.
    pub fn submit_and_wait<U: WorkUnit>(
        &self,
        units: Vec<U>,
        report_progress: bool,
    ) -> Vec<U::Output> {
        let total = units.len();
        if total == 0 {
            return Vec::new();
        }

        let done = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);
        for unit in units {
            let done = Arc::clone(&done);
            handles.push(self.submit_with_callback(unit, move |outcome| {
                if let Err(err) = outcome {
                    error!("work unit failed: {err:#}");
                }
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        if report_progress {
            while done.load(Ordering::SeqCst) < total {
                info!("{} of {} jobs complete", done.load(Ordering::SeqCst), total);
                thread::sleep(PROGRESS_INTERVAL);
            }
            info!("all {total} jobs complete");
        }

        let mut outputs = Vec::with_capacity(total);
        for handle in handles {
            if let Ok(output) = handle.join() {
                outputs.push(output);
            }
        }
        outputs
    }

    /// Stops accepting work and joins the pool. Worker threads never prevent
    /// process shutdown, so calling this is optional.
    pub fn shutdown(self) {
        let Self { queue, threads } = self;
        drop(queue);
        for handle in threads {
            let _ = handle.join();
        }
    }
}

fn run_worker(rx: Arc<Mutex<Receiver<Task>>>) {
    loop {
        let task = rx.lock().recv();
        match task {
            Ok(task) => task(),
            // queue closed
            Err(_) => break,
        }
    }
}

pin_project! {
    /// Resolves once, with either the unit's output or its failure.
    pub struct JobHandle<T> {
        #[pin]
        inner: oneshot::Receiver<Result<T>>,
    }
}

impl<T> JobHandle<T> {
    /// Blocks the calling thread until the unit finishes.
    pub fn join(self) -> Result<T> {
        self.inner
            .blocking_recv()
            .unwrap_or_else(|_| Err(anyhow!("executor dropped the job")))
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.inner
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(anyhow!("executor dropped the job"))))
    }
}
